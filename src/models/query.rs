use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::UsageError;
use crate::models::dataset::DatasetId;

/// One result row as returned by the backend: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A natural-language question, trimmed and length-checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
#[serde(transparent)]
pub struct Question(#[garde(length(chars, min = 1, max = 2000))] String);

impl Question {
    pub fn new(raw: &str) -> Result<Self, UsageError> {
        let question = Self(raw.trim().to_string());
        question
            .validate()
            .map_err(|e| UsageError::InvalidQuestion(e.to_string()))?;
        Ok(question)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Visual form requested for a result set. Unknown kinds render as bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case", from = "String")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ChartKind {
    #[default]
    #[strum(to_string = "bar_chart", serialize = "bar")]
    BarChart,
    #[strum(to_string = "line_chart", serialize = "line")]
    LineChart,
    #[strum(to_string = "pie_chart", serialize = "pie")]
    PieChart,
    SingleValue,
    Table,
}

impl From<String> for ChartKind {
    fn from(raw: String) -> Self {
        raw.trim().parse().unwrap_or_default()
    }
}

/// Axis mapping that tells a renderer how to plot the rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type", default)]
    pub kind: ChartKind,
    #[serde(default)]
    pub x_axis: Option<String>,
    #[serde(default)]
    pub y_axis: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Fast-path payload: rows plus chart configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(alias = "data")]
    pub rows: Vec<Row>,
    #[serde(rename = "chart_config")]
    pub chart: ChartSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_process: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Query failed: {0}")]
pub struct QueryError(pub String);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Narrative generation failed: {0}")]
pub struct NarrativeError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum FastResult {
    Pending,
    Ready(QueryResult),
    Failed(QueryError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NarrativeState {
    NotStarted,
    InFlight,
    Ready(String),
    Failed(NarrativeError),
}

/// One answer cycle for a question against a dataset.
///
/// The fast result and the narrative are filled in independently; the
/// narrative only leaves `NotStarted` once the fast result is `Ready`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecution {
    pub id: Uuid,
    pub generation: u64,
    pub question: Question,
    pub dataset_id: DatasetId,
    pub fast: FastResult,
    pub narrative: NarrativeState,
    pub submitted_at: DateTime<Utc>,
}

impl QueryExecution {
    pub fn new(generation: u64, question: Question, dataset_id: DatasetId) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            question,
            dataset_id,
            fast: FastResult::Pending,
            narrative: NarrativeState::NotStarted,
            submitted_at: Utc::now(),
        }
    }

    pub fn rows(&self) -> Option<&[Row]> {
        match &self.fast {
            FastResult::Ready(result) => Some(&result.rows),
            _ => None,
        }
    }

    pub fn narrative_text(&self) -> Option<&str> {
        match &self.narrative {
            NarrativeState::Ready(text) => Some(text),
            _ => None,
        }
    }
}
