use async_trait::async_trait;

use crate::core::types::{Params, QueryOutput};
use crate::error::AppResult;

/// Executes one parameterized statement and returns its rows.
///
/// The paginator never owns a database connection; whoever builds it hands
/// one of these in. Implementations report backend failures as
/// [`AppError::Query`](crate::error::AppError::Query).
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn execute(&self, sql: &str, parameters: &Params) -> AppResult<QueryOutput>;
}

#[async_trait]
impl<P: ExecutionPort + ?Sized> ExecutionPort for &P {
    async fn execute(&self, sql: &str, parameters: &Params) -> AppResult<QueryOutput> {
        (**self).execute(sql, parameters).await
    }
}

#[async_trait]
impl<P: ExecutionPort + ?Sized> ExecutionPort for std::sync::Arc<P> {
    async fn execute(&self, sql: &str, parameters: &Params) -> AppResult<QueryOutput> {
        (**self).execute(sql, parameters).await
    }
}
