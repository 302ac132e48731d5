//! Fan-in: normalize worker results into one evidence set.
//!
//! Successful payloads become [`EvidenceEntry`] values, failures become
//! [`MissingProfile`] diagnostics. A failed identity is never rendered into
//! the evidence, and entries keep profile submission order.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::dispatch::{WorkerOutcome, WorkerResult};
use crate::error::WorkerFailure;

/// Response contract appended to worker requests in structured mode.
pub const RECORD_CONTRACT: &str = r#"Format your response as JSON with the following structure:
{
    "key_insights": [],
    "concerns": [],
    "improvement_suggestions": [],
    "missing_elements": [],
    "priority_areas": []
}"#;

/// Payload contract the workers were told to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    /// Free text, wrapped in identity-tagged spans.
    #[default]
    Tagged,
    /// JSON matching [`AnalysisRecord`].
    Structured,
}

/// Fixed-schema record produced by a worker in structured mode.
///
/// Absent keys parse as empty lists; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRecord {
    #[serde(deserialize_with = "null_as_empty")]
    pub key_insights: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub concerns: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub improvement_suggestions: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub missing_elements: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub priority_areas: Vec<String>,
}

impl AnalysisRecord {
    pub fn is_empty(&self) -> bool {
        self.key_insights.is_empty()
            && self.concerns.is_empty()
            && self.improvement_suggestions.is_empty()
            && self.missing_elements.is_empty()
            && self.priority_areas.is_empty()
    }
}

/// Parse a worker payload into an [`AnalysisRecord`].
///
/// Models often wrap JSON in markdown fences or surround it with prose, so
/// parsing starts at the first `{` and stops after the first complete object;
/// whatever follows it is ignored.
pub fn parse_analysis_record(payload: &str) -> Result<AnalysisRecord, String> {
    let start = payload
        .find('{')
        .ok_or_else(|| "no JSON object found in worker payload".to_string())?;

    serde_json::Deserializer::from_str(&payload[start..])
        .into_iter::<AnalysisRecord>()
        .next()
        .ok_or_else(|| "no JSON object found in worker payload".to_string())?
        .map_err(|e| e.to_string())
}

/// `null` reads as an empty list.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EvidencePayload {
    Text(String),
    Record(AnalysisRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub identity: String,
    pub payload: EvidencePayload,
}

/// A profile that contributed nothing to the evidence, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingProfile {
    pub identity: String,
    pub failure: WorkerFailure,
}

/// Evidence keyed by profile identity plus the identities that are missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedEvidence {
    pub mode: EvidenceMode,
    entries: Vec<EvidenceEntry>,
    missing: Vec<MissingProfile>,
}

impl AggregatedEvidence {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    pub fn get(&self, identity: &str) -> Option<&EvidencePayload> {
        self.entries
            .iter()
            .find(|e| e.identity == identity)
            .map(|e| &e.payload)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identity.as_str())
    }

    pub fn missing(&self) -> &[MissingProfile] {
        &self.missing
    }

    /// True when at least one profile failed.
    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Render the evidence in the form handed to the synthesis planner.
    ///
    /// Tagged mode emits `<info key="ID">TEXT</info>` lines; structured mode
    /// emits a pretty-printed JSON object keyed by identity.
    pub fn render(&self) -> String {
        match self.mode {
            EvidenceMode::Tagged => self
                .entries
                .iter()
                .map(|entry| {
                    let text = match &entry.payload {
                        EvidencePayload::Text(text) => text.clone(),
                        EvidencePayload::Record(record) => {
                            serde_json::to_string(record).unwrap_or_default()
                        }
                    };
                    format!(
                        "<info key=\"{}\">{}</info>",
                        escape_attr(&entry.identity),
                        text
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            EvidenceMode::Structured => {
                let mut map = serde_json::Map::new();
                for entry in &self.entries {
                    let value = match &entry.payload {
                        EvidencePayload::Record(record) => {
                            serde_json::to_value(record).unwrap_or_default()
                        }
                        EvidencePayload::Text(text) => serde_json::Value::String(text.clone()),
                    };
                    map.insert(entry.identity.clone(), value);
                }
                serde_json::to_string_pretty(&serde_json::Value::Object(map)).unwrap_or_default()
            }
        }
    }

    /// Hex-encoded SHA-256 of [`render`](Self::render).
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.render().as_bytes()))
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Normalizes [`WorkerResult`]s according to an [`EvidenceMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator {
    mode: EvidenceMode,
}

impl ResultAggregator {
    pub fn new(mode: EvidenceMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> EvidenceMode {
        self.mode
    }

    fn normalize(&self, identity: &str, text: &str) -> Result<EvidencePayload, WorkerFailure> {
        match self.mode {
            EvidenceMode::Tagged => Ok(EvidencePayload::Text(text.trim().to_string())),
            EvidenceMode::Structured => parse_analysis_record(text)
                .map(EvidencePayload::Record)
                .map_err(|reason| {
                    warn!(profile = %identity, %reason, "worker payload failed schema parse");
                    WorkerFailure::ParseError(reason)
                }),
        }
    }

    pub fn aggregate(&self, results: Vec<WorkerResult>) -> AggregatedEvidence {
        let mut entries: Vec<EvidenceEntry> = Vec::with_capacity(results.len());
        let mut missing: Vec<MissingProfile> = Vec::new();

        for result in results {
            let identity = result.profile_identity;
            let normalized = match result.outcome {
                WorkerOutcome::Failure(failure) => Err(failure),
                WorkerOutcome::Success(text) => self.normalize(&identity, &text),
            };

            let seen = entries.iter().any(|e| e.identity == identity)
                || missing.iter().any(|m| m.identity == identity);
            if seen {
                warn!(
                    profile = %identity,
                    "duplicate identity in worker results; keeping the later result"
                );
            }

            // Last result wins: an identity lives in exactly one of the two lists.
            match normalized {
                Ok(payload) => {
                    missing.retain(|m| m.identity != identity);
                    match entries.iter_mut().find(|e| e.identity == identity) {
                        Some(existing) => existing.payload = payload,
                        None => entries.push(EvidenceEntry { identity, payload }),
                    }
                }
                Err(failure) => {
                    entries.retain(|e| e.identity != identity);
                    match missing.iter_mut().find(|m| m.identity == identity) {
                        Some(existing) => existing.failure = failure,
                        None => missing.push(MissingProfile { identity, failure }),
                    }
                }
            }
        }

        debug!(
            entries = entries.len(),
            missing = missing.len(),
            mode = ?self.mode,
            "evidence aggregated"
        );

        AggregatedEvidence {
            mode: self.mode,
            entries,
            missing,
        }
    }
}
