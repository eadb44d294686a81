pub mod jobs;
pub mod source;
