use regex::Regex;

use crate::shared::errors::AppError;

pub struct Validator;

impl Validator {
    pub fn validate_target_id(target_id: &str) -> Result<(), AppError> {
        if target_id.is_empty() {
            return Err(AppError::InvalidJobSpec(
                "Target id cannot be empty".to_string(),
            ));
        }
        if target_id.len() > 512 {
            return Err(AppError::InvalidJobSpec(
                "Target id too long (max 512 characters)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_source_name(name: &str) -> Result<(), AppError> {
        if name.is_empty() {
            return Err(AppError::InvalidJobSpec(
                "Source name cannot be empty".to_string(),
            ));
        }
        if name.len() > 100 {
            return Err(AppError::InvalidJobSpec(
                "Source name too long (max 100 characters)".to_string(),
            ));
        }

        // Source names double as registry keys and snapshot fields, keep them plain
        let re = Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap();
        if !re.is_match(name) {
            return Err(AppError::InvalidJobSpec(
                "Source name contains invalid characters".to_string(),
            ));
        }
        Ok(())
    }
}
