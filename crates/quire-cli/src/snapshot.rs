//! Snapshot documents consumed by `quire render`.
//!
//! A snapshot is one JSON object: the `response` being reported on plus its
//! related records (`student`, `advisor`, `survey`, `answers`, `feedback`).
//! Timestamps are unix milliseconds.
//!
//! Only `response` is decoded up front. The related records stay as raw JSON
//! until [`Snapshot::relations`] is first called; a malformed related record
//! therefore surfaces while fingerprinting rather than while opening.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: u64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: u64,
    pub question: String,
    pub value: String,
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

/// Latest modification time of a record with an optional edit timestamp.
pub(crate) fn touched_at(created_at: u64, updated_at: Option<u64>) -> u64 {
    updated_at.map_or(created_at, |updated| updated.max(created_at))
}

impl AnswerRecord {
    pub fn touched_at(&self) -> u64 {
        touched_at(self.created_at, self.updated_at)
    }
}

impl FeedbackRecord {
    pub fn touched_at(&self) -> u64 {
        touched_at(self.created_at, self.updated_at)
    }
}

/// Records related to a response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relations {
    #[serde(default)]
    pub student: Option<PersonRecord>,
    #[serde(default)]
    pub advisor: Option<PersonRecord>,
    #[serde(default)]
    pub survey: Option<SurveyRecord>,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    #[serde(default)]
    pub feedback: Vec<FeedbackRecord>,
}

#[derive(Deserialize)]
struct SnapshotDocument {
    response: ResponseRecord,
    #[serde(flatten)]
    related: Map<String, Value>,
}

#[derive(Debug)]
pub struct Snapshot {
    response: ResponseRecord,
    related: Map<String, Value>,
    relations: OnceLock<Result<Relations, String>>,
}

impl Snapshot {
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid snapshot {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let document: SnapshotDocument = serde_json::from_str(text)?;
        Ok(Self {
            response: document.response,
            related: document.related,
            relations: OnceLock::new(),
        })
    }

    /// Build a snapshot whose relations are already resolved.
    pub fn from_parts(response: ResponseRecord, relations: Relations) -> Self {
        let loaded = OnceLock::new();
        let _ = loaded.set(Ok(relations));
        Self {
            response,
            related: Map::new(),
            relations: loaded,
        }
    }

    pub fn response(&self) -> &ResponseRecord {
        &self.response
    }

    /// Decode the related records on first use; later calls return the same
    /// value (or the same error).
    pub fn relations(&self) -> Result<&Relations> {
        let loaded = self.relations.get_or_init(|| {
            tracing::debug!(
                target: "quire.cli",
                response = self.response.id,
                "loading related records"
            );
            serde_json::from_value::<Relations>(Value::Object(self.related.clone()))
                .map_err(|err| format!("invalid related records: {err}"))
        });
        match loaded {
            Ok(relations) => Ok(relations),
            Err(message) => Err(anyhow!(message.clone())),
        }
    }
}
