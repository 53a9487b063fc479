pub mod types;

pub use types::{
    Destination, FileKey, InsertStatement, InvalidIdentifier, ProjectId, QueryParameter,
    QueryValue, ResolutionSummary, TableGroup,
};

use chrono::{DateTime, Utc};

use crate::figma::CommentBatch;

/// Count resolved comments against the batch size.
///
/// Only the presence of `resolved_at` matters; its value and `created_at`
/// are never looked at.
pub fn summarize(batch: &CommentBatch) -> ResolutionSummary {
    let resolved = batch.comments().iter().filter(|c| c.is_resolved()).count();
    ResolutionSummary {
        total: batch.len(),
        resolved,
    }
}

/// Build the append statement recording `summary` as observed at `observed_at`.
pub fn build_insert(
    destination: &Destination,
    observed_at: DateTime<Utc>,
    summary: &ResolutionSummary,
) -> InsertStatement {
    InsertStatement {
        destination: destination.clone(),
        parameters: vec![
            QueryParameter {
                name: "observed_at",
                value: QueryValue::Timestamp(observed_at),
            },
            QueryParameter {
                name: "total_comments",
                value: QueryValue::Int64(count(summary.total)),
            },
            QueryParameter {
                name: "resolved_comments",
                value: QueryValue::Int64(count(summary.resolved)),
            },
        ],
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
