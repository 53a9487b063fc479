#[cfg(test)]
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Failed to decode comments response: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Top-level shape of `GET /v1/files/{key}/comments`.
#[derive(Debug, Clone, Deserialize)]
struct CommentsResponse {
    comments: Vec<Comment>,
}

/// A single comment thread entry on a Figma file.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)] // Full upstream shape; the summary only reads resolved_at
pub struct Comment {
    /// Comment id
    pub id: String,
    /// Key of the file the comment belongs to
    #[serde(default)]
    pub file_key: String,
    /// Id of the parent comment, empty for top-level comments
    #[serde(default)]
    pub parent_id: String,
    /// Author, if the API included one
    #[serde(default)]
    pub user: Option<User>,
    /// When the comment was created
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// When the comment was resolved. Presence alone marks it resolved.
    #[serde(default)]
    pub resolved_at: Option<Timestamp>,
    /// Opaque ordering key
    #[serde(default)]
    pub order_id: String,
    /// Comment text
    #[serde(default)]
    pub message: String,
}

impl Comment {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Comment author as reported by Figma.
#[derive(Debug, Clone, Default, Deserialize)]
#[allow(dead_code)]
pub struct User {
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub img_url: String,
    #[serde(default)]
    pub id: String,
}

/// A timestamp exactly as Figma sent it.
///
/// Kept as the raw string so an unparseable value is still a present value
/// and never collapses into a default date.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

#[cfg(test)]
impl Timestamp {
    pub fn new(raw: impl Into<String>) -> Self {
        Timestamp(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as RFC 3339. Returns None for malformed values.
    pub fn parsed(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.0)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// All comments returned for one file in one call.
#[derive(Debug, Clone, Default)]
pub struct CommentBatch {
    comments: Vec<Comment>,
}

impl CommentBatch {
    pub fn new(comments: Vec<Comment>) -> Self {
        Self { comments }
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

/// Decode a comments response body into a [`CommentBatch`].
///
/// Fails when the body is not JSON, is not an object, or has no `comments`
/// field. Missing `user`, `created_at` and `resolved_at` decode to `None`.
pub fn decode(body: &[u8]) -> Result<CommentBatch, DecodeError> {
    let response: CommentsResponse = serde_json::from_slice(body)?;
    Ok(CommentBatch::new(response.comments))
}
