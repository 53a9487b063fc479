pub mod types;

pub use types::{decode, CommentBatch, DecodeError};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::FigmaConfig;
use crate::okr::FileKey;

const TOKEN_HEADER: &str = "X-Figma-Token";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum FigmaError {
    #[error("Figma token not found in config or FIGMA_SECRET")]
    MissingToken,

    #[error("Failed to configure Figma HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Figma request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Figma responded with {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Anything that can produce the comments of a file.
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// Fetch every comment on `file`. One attempt, no retries.
    async fn comments(&self, file: &FileKey) -> Result<CommentBatch, FigmaError>;
}

/// Client for the Figma comments endpoint.
///
/// Built once from [`FigmaConfig`]; the token and timeout are fixed for the
/// client's lifetime.
#[derive(Debug, Clone)]
pub struct FigmaClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl FigmaClient {
    pub fn new(config: &FigmaConfig) -> Result<Self, FigmaError> {
        let token = config.token.clone().ok_or(FigmaError::MissingToken)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("figma-okr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FigmaError::Client)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn comments_url(&self, file: &FileKey) -> String {
        format!("{}/{}/comments", self.base_url, file)
    }
}

#[async_trait]
impl CommentSource for FigmaClient {
    #[instrument(skip(self), fields(file = %file))]
    async fn comments(&self, file: &FileKey) -> Result<CommentBatch, FigmaError> {
        let url = self.comments_url(file);
        debug!(%url, "fetching comments from Figma");

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| {
                debug!(timeout = e.is_timeout(), error = %e, "Figma request failed");
                FigmaError::Transport(e)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let mut body = response.text().await.unwrap_or_else(|e| {
                debug!(error = %e, "failed to read Figma error body");
                String::new()
            });
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            debug!(%status, "Figma returned an error status");
            return Err(FigmaError::Upstream { status, body });
        }

        let bytes = response.bytes().await.map_err(FigmaError::Transport)?;
        debug!(body_bytes = bytes.len(), "received comments response");

        let batch = decode(&bytes)?;
        debug!(comments = batch.len(), "decoded comments");
        Ok(batch)
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Serves the bundled sample response instead of calling Figma.
#[derive(Debug, Clone, Default)]
pub struct FixtureSource;

impl FixtureSource {
    const BODY: &'static str = include_str!("../../tests/fixtures/comments.json");
}

#[async_trait]
impl CommentSource for FixtureSource {
    async fn comments(&self, file: &FileKey) -> Result<CommentBatch, FigmaError> {
        debug!(file = %file, "serving comments from embedded fixture");
        Ok(decode(Self::BODY.as_bytes())?)
    }
}
