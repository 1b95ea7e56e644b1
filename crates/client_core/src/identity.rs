//! Email/password identity against the server's `/auth/*` routes.
//!
//! The client keeps at most one [`Session`]. Signing out only forgets it;
//! issued tokens stay valid until they expire.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use shared::{
    domain::User,
    protocol::{current_user_route, sign_in_route, sign_up_route, Credentials, SessionResponse},
};
use tokio::sync::RwLock;
use tracing::info;

use crate::{ApiClient, ClientError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

impl From<SessionResponse> for Session {
    fn from(response: SessionResponse) -> Self {
        Self {
            access_token: response.access_token,
            expires_at: response.expires_at,
            user: response.user,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, ClientError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ClientError>;
    async fn sign_out(&self);
    async fn current_user(&self) -> Option<User>;
    async fn session_token(&self) -> Option<String>;
}

pub struct HttpIdentityClient {
    api: ApiClient,
    session: RwLock<Option<Session>>,
}

impl HttpIdentityClient {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            session: RwLock::new(None),
        }
    }

    /// Asks the server who the held token belongs to.
    pub async fn fetch_user(&self) -> Result<User, ClientError> {
        let token = self.session_token().await.ok_or(ClientError::Unauthenticated)?;
        self.api
            .send(
                self.api
                    .request(Method::GET, current_user_route(), Some(&token)),
            )
            .await
    }

    async fn live_session(&self) -> Option<Session> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|session| !session.is_expired())
            .cloned()
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let request = self
            .api
            .request(Method::POST, sign_up_route(), None)
            .json(&Credentials {
                email: email.to_string(),
                password: password.to_string(),
            });
        let user: User = self.api.send(request).await?;
        info!(user_id = %user.id, "account created");
        Ok(user)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ClientError> {
        let request = self
            .api
            .request(Method::POST, sign_in_route(), None)
            .json(&Credentials {
                email: email.to_string(),
                password: password.to_string(),
            });
        let response: SessionResponse = self.api.send(request).await?;
        let session = Session::from(response);
        info!(user_id = %session.user.id, "signed in");
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) {
        if let Some(session) = self.session.write().await.take() {
            info!(user_id = %session.user.id, "signed out");
        }
    }

    async fn current_user(&self) -> Option<User> {
        self.live_session().await.map(|session| session.user)
    }

    async fn session_token(&self) -> Option<String> {
        self.live_session().await.map(|session| session.access_token)
    }
}
