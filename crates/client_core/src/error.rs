use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthenticated => Some(401),
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            Self::Url(_) => None,
        }
    }
}
