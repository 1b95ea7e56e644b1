use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::error::ErrorBody;
use url::Url;

pub mod error;
pub mod identity;
pub mod store;
pub mod tenant;
pub mod workflow_list;

pub use error::ClientError;
pub use identity::{HttpIdentityClient, IdentityProvider, Session};
pub use store::{HttpWorkflowStore, WorkflowStore};
pub use tenant::{open_workspace, TenantClient, Workspace};
pub use workflow_list::{ListError, WorkflowList, WorkflowListState, DEFAULT_CALL_TIMEOUT};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Thin HTTP handle shared by the identity, tenant and workflow clients.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    server_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.server_url)?;
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            server_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn request(&self, method: Method, path: &str, access_token: Option<&str>) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{path}", self.server_url));
        match access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthenticated);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
