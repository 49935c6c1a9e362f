use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport used for every upstream GBFS request.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
