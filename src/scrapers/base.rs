use crate::models::fetch::{FetchRequest, FetchResponse};
use crate::errors::Result;
use async_trait::async_trait;

/// Base trait for the scheduled fetch engine
#[async_trait]
pub trait Fetcher {
    /// Issue one request and wait for its response.
    ///
    /// Connection failures and timeouts come back as `Err`; any HTTP status,
    /// including non-2xx, is returned as a `FetchResponse` for the caller to judge.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}
