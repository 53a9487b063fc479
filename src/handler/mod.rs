use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::figma::{CommentSource, FigmaError};
use crate::okr::{self, Destination, FileKey, InvalidIdentifier, ProjectId, ResolutionSummary, TableGroup};
use crate::warehouse::{Warehouse, WriteError};

/// Source of the observation time stamped on each fact row.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where in the pipeline a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Transport,
    Upstream,
    Decode,
    Write,
    Cancelled,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "validation",
            Stage::Transport => "transport",
            Stage::Upstream => "upstream",
            Stage::Decode => "decode",
            Stage::Write => "write",
            Stage::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Validation(#[from] InvalidIdentifier),

    #[error("figma: {0}")]
    Figma(#[from] FigmaError),

    #[error("bigquery: {0}")]
    Write(#[from] WriteError),

    #[error("request cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn stage(&self) -> Stage {
        match self {
            HandlerError::Validation(_) => Stage::Validation,
            HandlerError::Figma(FigmaError::Upstream { .. }) => Stage::Upstream,
            HandlerError::Figma(FigmaError::Decode(_)) => Stage::Decode,
            HandlerError::Figma(_) => Stage::Transport,
            HandlerError::Write(_) => Stage::Write,
            HandlerError::Cancelled => Stage::Cancelled,
        }
    }
}

/// Drives one invocation: validate the file, fetch its comments, append the
/// summary to the warehouse.
///
/// Holds no per-request state, so one instance serves concurrent requests.
pub struct Handler {
    source: Arc<dyn CommentSource>,
    warehouse: Arc<dyn Warehouse>,
    clock: Arc<dyn Clock>,
    project: ProjectId,
    table_group: TableGroup,
}

impl Handler {
    pub fn new(
        source: Arc<dyn CommentSource>,
        warehouse: Arc<dyn Warehouse>,
        clock: Arc<dyn Clock>,
        project: ProjectId,
        table_group: TableGroup,
    ) -> Self {
        Self {
            source,
            warehouse,
            clock,
            project,
            table_group,
        }
    }

    /// Handle one request for `file`.
    ///
    /// Resolving `cancel` aborts whatever I/O is in flight and yields
    /// [`HandlerError::Cancelled`].
    pub async fn handle<C>(
        &self,
        file: Option<&str>,
        cancel: C,
    ) -> Result<ResolutionSummary, HandlerError>
    where
        C: Future<Output = ()>,
    {
        let raw = file.unwrap_or_default();
        let span = info_span!("handle", file = %raw);

        async move {
            let result = match FileKey::parse(raw) {
                Ok(file) => {
                    tokio::select! {
                        biased;
                        _ = cancel => Err(HandlerError::Cancelled),
                        result = self.execute(&file) => result,
                    }
                }
                Err(e) => Err(e.into()),
            };

            match &result {
                Ok(summary) => info!(
                    total = summary.total,
                    resolved = summary.resolved,
                    "recorded comment summary"
                ),
                Err(e) => warn!(stage = %e.stage(), error = %e, "request failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, file: &FileKey) -> Result<ResolutionSummary, HandlerError> {
        let batch = self.source.comments(file).await?;
        if batch.is_empty() {
            debug!("file has no comments, recording zeros");
        }
        let summary = okr::summarize(&batch);
        debug!(total = summary.total, resolved = summary.resolved, "summarized comments");

        let destination = Destination {
            project: self.project.clone(),
            table_group: self.table_group.clone(),
            file: file.clone(),
        };
        let statement = okr::build_insert(&destination, self.clock.now(), &summary);
        self.warehouse.append(&statement).await?;
        Ok(summary)
    }
}

/// Test doubles shared by the handler and server tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use async_trait::async_trait;
    use crate::figma::{decode, CommentBatch};
    use reqwest::StatusCode;
    use crate::okr::InsertStatement;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn fixed_time() -> DateTime<Utc> {
        "2024-05-06T07:08:09Z".parse().unwrap()
    }

    pub struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            fixed_time()
        }
    }

    pub enum Reply {
        Body(&'static str),
        Status(u16),
        Timeout,
        Hang,
    }

    /// Comment source that counts calls and replies with a canned outcome.
    pub struct FakeSource {
        reply: Reply,
        pub calls: AtomicUsize,
    }

    impl FakeSource {
        pub fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommentSource for FakeSource {
        async fn comments(&self, _file: &FileKey) -> Result<CommentBatch, FigmaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Body(body) => Ok(decode(body.as_bytes())?),
                Reply::Status(code) => Err(FigmaError::Upstream {
                    status: StatusCode::from_u16(*code).unwrap(),
                    body: String::new(),
                }),
                Reply::Timeout => Err(FigmaError::Transport(timeout_error().await)),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    /// A real reqwest timeout error, produced against a listener that never answers.
    async fn timeout_error() -> reqwest::Error {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap()
            .get(url)
            .send()
            .await
            .unwrap_err()
    }

    /// Warehouse that records statements, optionally failing every write.
    #[derive(Default)]
    pub struct RecordingWarehouse {
        pub fail: bool,
        pub statements: Mutex<Vec<InsertStatement>>,
    }

    impl RecordingWarehouse {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn statements(&self) -> Vec<InsertStatement> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Warehouse for RecordingWarehouse {
        async fn append(&self, statement: &InsertStatement) -> Result<(), WriteError> {
            self.statements.lock().unwrap().push(statement.clone());
            if self.fail {
                return Err(WriteError::Rejected {
                    status: StatusCode::FORBIDDEN,
                    message: "Access Denied".to_string(),
                });
            }
            Ok(())
        }
    }

    pub fn test_handler(source: Arc<FakeSource>, warehouse: Arc<RecordingWarehouse>) -> Handler {
        Handler::new(
            source,
            warehouse,
            Arc::new(FixedClock),
            ProjectId::parse("atb-mobility-platform").unwrap(),
            TableGroup::parse("figma_comments_okr").unwrap(),
        )
    }

    pub const THREE_COMMENTS: &str = r#"{"comments": [
        {"id": "1", "resolved_at": "2021-01-02T00:00:00Z"},
        {"id": "2", "resolved_at": null, "user": null},
        {"id": "3", "resolved_at": "2021-01-03T00:00:00Z", "created_at": null}
    ]}"#;
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::okr::QueryValue;
    use reqwest::StatusCode;
    use std::future::pending;

    #[tokio::test]
    async fn test_handle_records_summary() {
        let source = Arc::new(FakeSource::new(Reply::Body(THREE_COMMENTS)));
        let warehouse = Arc::new(RecordingWarehouse::default());
        let handler = test_handler(source.clone(), warehouse.clone());

        let summary = handler.handle(Some("abc123"), pending()).await.unwrap();
        assert_eq!(summary, ResolutionSummary { total: 3, resolved: 2 });
        assert_eq!(source.calls(), 1);

        let statements = warehouse.statements();
        assert_eq!(statements.len(), 1);
        let statement = &statements[0];
        assert_eq!(
            statement.destination.to_string(),
            "atb-mobility-platform.figma_comments_okr.abc123"
        );
        assert_eq!(
            statement.parameter("observed_at"),
            Some(&QueryValue::Timestamp(fixed_time()))
        );
        assert_eq!(statement.parameter("total_comments"), Some(&QueryValue::Int64(3)));
        assert_eq!(statement.parameter("resolved_comments"), Some(&QueryValue::Int64(2)));
    }

    #[tokio::test]
    async fn test_handle_writes_zero_comment_files() {
        let source = Arc::new(FakeSource::new(Reply::Body(r#"{"comments": []}"#)));
        let warehouse = Arc::new(RecordingWarehouse::default());
        let handler = test_handler(source, warehouse.clone());

        let summary = handler.handle(Some("abc123"), pending()).await.unwrap();
        assert_eq!(summary, ResolutionSummary::default());
        assert_eq!(warehouse.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_rejects_missing_or_unsafe_file() {
        for file in [None, Some(""), Some("abc.123"), Some("abc`; DROP")] {
            let source = Arc::new(FakeSource::new(Reply::Body(THREE_COMMENTS)));
            let warehouse = Arc::new(RecordingWarehouse::default());
            let handler = test_handler(source.clone(), warehouse.clone());

            let err = handler.handle(file, pending()).await.unwrap_err();
            assert_eq!(err.stage(), Stage::Validation);
            assert_eq!(source.calls(), 0);
            assert!(warehouse.statements().is_empty());
        }
    }

    #[tokio::test]
    async fn test_handle_maps_upstream_status() {
        let source = Arc::new(FakeSource::new(Reply::Status(403)));
        let warehouse = Arc::new(RecordingWarehouse::default());
        let handler = test_handler(source, warehouse.clone());

        let err = handler.handle(Some("abc123"), pending()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Upstream);
        assert!(matches!(
            err,
            HandlerError::Figma(FigmaError::Upstream { status, .. }) if status == StatusCode::FORBIDDEN
        ));
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test]
    async fn test_handle_maps_decode_failure() {
        let source = Arc::new(FakeSource::new(Reply::Body(r#"{"data": []}"#)));
        let warehouse = Arc::new(RecordingWarehouse::default());
        let handler = test_handler(source, warehouse.clone());

        let err = handler.handle(Some("abc123"), pending()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Decode);
        assert!(err.to_string().starts_with("figma: "));
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test]
    async fn test_handle_upstream_timeout_skips_write() {
        let source = Arc::new(FakeSource::new(Reply::Timeout));
        let warehouse = Arc::new(RecordingWarehouse::default());
        let handler = test_handler(source, warehouse.clone());

        let err = handler.handle(Some("abc123"), pending()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Transport);
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test]
    async fn test_handle_maps_write_failure() {
        let source = Arc::new(FakeSource::new(Reply::Body(THREE_COMMENTS)));
        let warehouse = Arc::new(RecordingWarehouse::failing());
        let handler = test_handler(source, warehouse);

        let err = handler.handle(Some("abc123"), pending()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Write);
        assert!(err.to_string().contains("Access Denied"));
    }

    #[tokio::test]
    async fn test_handle_cancel_aborts_in_flight_fetch() {
        let source = Arc::new(FakeSource::new(Reply::Hang));
        let warehouse = Arc::new(RecordingWarehouse::default());
        let handler = test_handler(source.clone(), warehouse.clone());

        let cancel = tokio::time::sleep(std::time::Duration::from_millis(20));
        let err = handler.handle(Some("abc123"), cancel).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Cancelled);
        assert_eq!(source.calls(), 1);
        assert!(warehouse.statements().is_empty());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Upstream.to_string(), "upstream");
        assert_eq!(Stage::Write.to_string(), "write");
    }
}
