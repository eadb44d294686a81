use crate::modules::jobs::domain::entities::Job;
use crate::shared::errors::AppResult;
use async_trait::async_trait;

/// Execution contract for a scan source.
///
/// One implementation per upstream site. The scheduler invokes `execute`
/// once per dispatched job and routes the outcome to the queue's
/// `complete`/`fail`; an implementation may retry or throttle internally,
/// but each invocation counts as a single attempt against the job's
/// retry budget.
#[async_trait]
pub trait SourceExecutor: Send + Sync {
    /// The source name this executor handles (registry key)
    fn source_name(&self) -> &str;

    /// Fetch the job's target from the upstream source.
    ///
    /// The returned value is opaque to the core; it is stored verbatim as
    /// the job's result (e.g. chapter metadata, page counts, archive paths).
    async fn execute(&self, job: &Job) -> AppResult<serde_json::Value>;
}
