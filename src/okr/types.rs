use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    #[error("no {0} specified")]
    Empty(&'static str),

    #[error("invalid {kind} {value:?}: only {allowed} are allowed")]
    Unsafe {
        kind: &'static str,
        value: String,
        allowed: &'static str,
    },
}

fn check(
    kind: &'static str,
    value: &str,
    allowed: &'static str,
    is_allowed: impl Fn(char) -> bool,
) -> Result<(), InvalidIdentifier> {
    if value.is_empty() {
        return Err(InvalidIdentifier::Empty(kind));
    }
    if !value.chars().all(is_allowed) {
        return Err(InvalidIdentifier::Unsafe {
            kind,
            value: value.to_string(),
            allowed,
        });
    }
    Ok(())
}

/// A Figma file key that is safe to use as a BigQuery table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey(String);

impl FileKey {
    pub fn parse(value: &str) -> Result<Self, InvalidIdentifier> {
        check(
            "file",
            value,
            "ASCII letters, digits, '_' and '-'",
            |c| c.is_ascii_alphanumeric() || c == '_' || c == '-',
        )?;
        Ok(FileKey(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// BigQuery dataset holding one table per tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGroup(String);

impl TableGroup {
    pub fn parse(value: &str) -> Result<Self, InvalidIdentifier> {
        check(
            "table group",
            value,
            "ASCII letters, digits and '_'",
            |c| c.is_ascii_alphanumeric() || c == '_',
        )?;
        Ok(TableGroup(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Google Cloud project id owning the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn parse(value: &str) -> Result<Self, InvalidIdentifier> {
        check(
            "project",
            value,
            "lowercase letters, digits and '-'",
            |c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-',
        )?;
        Ok(ProjectId(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Fully-qualified table a fact row is appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub project: ProjectId,
    pub table_group: TableGroup,
    pub file: FileKey,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.project.as_str(),
            self.table_group.as_str(),
            self.file.as_str()
        )
    }
}

/// Resolved vs total comment counts for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolutionSummary {
    pub total: usize,
    pub resolved: usize,
}

impl ResolutionSummary {
    pub fn open(&self) -> usize {
        self.total - self.resolved
    }
}

impl fmt::Display for ResolutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} resolved", self.resolved, self.total)
    }
}

/// A typed value bound to a named query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Timestamp(DateTime<Utc>),
    Int64(i64),
}

impl QueryValue {
    /// BigQuery standard SQL type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Timestamp(_) => "TIMESTAMP",
            QueryValue::Int64(_) => "INT64",
        }
    }

    /// Value in the string form BigQuery expects for query parameters.
    pub fn render(&self) -> String {
        match self {
            QueryValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            QueryValue::Int64(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameter {
    pub name: &'static str,
    pub value: QueryValue,
}

/// A single parameterized `INSERT` appending one fact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub destination: Destination,
    pub parameters: Vec<QueryParameter>,
}

impl InsertStatement {
    /// Standard SQL text with `@name` placeholders for every parameter.
    pub fn sql(&self) -> String {
        let columns: Vec<&str> = self.parameters.iter().map(|p| p.name).collect();
        let placeholders: Vec<String> = columns.iter().map(|c| format!("@{c}")).collect();
        format!(
            "INSERT INTO `{}` ({}) VALUES ({})",
            self.destination,
            columns.join(", "),
            placeholders.join(", ")
        )
    }

    #[cfg(test)]
    pub fn parameter(&self, name: &str) -> Option<&QueryValue> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_accepts_figma_keys() {
        assert_eq!(FileKey::parse("abc123").unwrap().as_str(), "abc123");
        assert!(FileKey::parse("aBc_12-3").is_ok());
    }

    #[test]
    fn test_file_key_rejects_empty_and_unsafe() {
        assert_eq!(FileKey::parse(""), Err(InvalidIdentifier::Empty("file")));
        for bad in ["a.b", "a`b", "a b", "a;DROP", "ключ", "a/b"] {
            assert!(
                matches!(FileKey::parse(bad), Err(InvalidIdentifier::Unsafe { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_table_group_and_project_rules() {
        assert!(TableGroup::parse("figma_comments_okr").is_ok());
        assert!(TableGroup::parse("figma-comments").is_err());
        assert!(ProjectId::parse("atb-mobility-platform").is_ok());
        assert!(ProjectId::parse("Atb.Mobility").is_err());
    }

    #[test]
    fn test_destination_display() {
        let destination = Destination {
            project: ProjectId::parse("proj").unwrap(),
            table_group: TableGroup::parse("okr").unwrap(),
            file: FileKey::parse("abc123").unwrap(),
        };
        assert_eq!(destination.to_string(), "proj.okr.abc123");
    }

    #[test]
    fn test_summary_open_and_display() {
        let summary = ResolutionSummary { total: 5, resolved: 2 };
        assert_eq!(summary.open(), 3);
        assert_eq!(summary.to_string(), "2/5 resolved");
    }

    #[test]
    fn test_query_value_render() {
        let ts = "2024-05-06T07:08:09Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(QueryValue::Timestamp(ts).render(), "2024-05-06T07:08:09.000000Z");
        assert_eq!(QueryValue::Int64(42).render(), "42");
        assert_eq!(QueryValue::Int64(42).type_name(), "INT64");
    }
}
