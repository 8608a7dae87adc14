//! Core data model for the reconciliation pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod change;
pub mod monetary;
pub mod normalize;

pub use change::{classify, Classification};
pub use monetary::{ExtractedValue, MonetaryCandidate, MonetaryConfig, MonetaryTextParser};
pub use normalize::{content_hash, RecordNormalizer};

pub const CRATE_NAME: &str = "recon-core";

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseKindError {
    kind: &'static str,
    value: String,
}

/// Identity of an independent reconciliation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobId {
    Reservations,
    ErpContracts,
    LandValue,
}

impl JobId {
    pub const ALL: [JobId; 3] = [JobId::Reservations, JobId::ErpContracts, JobId::LandValue];

    pub fn as_str(self) -> &'static str {
        match self {
            JobId::Reservations => "reservations",
            JobId::ErpContracts => "erp-contracts",
            JobId::LandValue => "land-value",
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobId {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobId::ALL
            .into_iter()
            .find(|job| job.as_str() == s)
            .ok_or_else(|| ParseKindError {
                kind: "job",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Delta,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Delta => "delta",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "delta" => Ok(SyncMode::Delta),
            _ => Err(ParseKindError {
                kind: "sync mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Amount as it arrives on the wire: a JSON number or a locale-formatted string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Integer(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: String,
    pub changed_at: String,
}

/// CRM reservation. Broker and manager are referenced by id only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationPayload {
    pub unit_code: Option<String>,
    pub customer_name: Option<String>,
    pub broker_id: Option<i64>,
    pub manager_id: Option<i64>,
    pub status: Option<String>,
    pub status_history: Vec<StatusChange>,
    pub price: Option<RawAmount>,
    pub reserved_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractPayload {
    pub contract_number: Option<String>,
    pub customer_document: Option<String>,
    pub unit_code: Option<String>,
    pub total_value: Option<RawAmount>,
    pub signed_on: Option<String>,
    pub installments: Option<i64>,
    pub active: Option<bool>,
}

/// Free-text ledger entry; the monetary value is extracted during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LandValuePayload {
    pub blocks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Reservation(ReservationPayload),
    Contract(ContractPayload),
    LandValue(LandValuePayload),
}

/// Raw record as pulled from a remote system. Lives only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub payload: RecordPayload,
}

/// Normalized field value. The variant tag takes part in the content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(Decimal),
    Text(String),
    Instant(DateTime<Utc>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn text(value: Option<&str>) -> Self {
        match value {
            Some(v) => FieldValue::Text(v.to_string()),
            None => FieldValue::Null,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// Locally persisted representation of a remote entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub remote_id: String,
    pub fields: Fields,
    pub content_hash: String,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Per-run counters. Batches produce partial counts that are merged into the run total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl RunCounts {
    pub fn record(&mut self, classification: Classification) {
        self.total += 1;
        match classification {
            Classification::Create => self.created += 1,
            Classification::Update => self.updated += 1,
            Classification::Unchanged => self.unchanged += 1,
        }
    }

    pub fn record_failed(&mut self, count: usize) {
        self.total += count;
        self.failed += count;
    }

    pub fn merge(&mut self, other: RunCounts) {
        self.total += other.total;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }

    pub fn is_balanced(&self) -> bool {
        self.created + self.updated + self.unchanged + self.failed == self.total
    }
}

/// Immutable result of one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunStats {
    pub run_id: Uuid,
    pub job: JobId,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: RunCounts,
}

impl SyncRunStats {
    pub fn total(&self) -> usize {
        self.counts.total
    }

    pub fn created(&self) -> usize {
        self.counts.created
    }

    pub fn updated(&self) -> usize {
        self.counts.updated
    }

    pub fn unchanged(&self) -> usize {
        self.counts.unchanged
    }

    pub fn failed(&self) -> usize {
        self.counts.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_round_trip_through_their_names() {
        for job in JobId::ALL {
            assert_eq!(job.as_str().parse::<JobId>().unwrap(), job);
        }
        assert!("inventory".parse::<JobId>().is_err());
    }

    #[test]
    fn payload_variants_are_tagged_by_kind() {
        let json = serde_json::json!({
            "kind": "contract",
            "contract_number": "C-10",
            "total_value": "150.000,00",
            "unexpected": true
        });
        let payload: RecordPayload = serde_json::from_value(json).unwrap();
        match payload {
            RecordPayload::Contract(c) => {
                assert_eq!(c.contract_number.as_deref(), Some("C-10"));
                assert_eq!(c.total_value, Some(RawAmount::Text("150.000,00".into())));
                assert_eq!(c.installments, None);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn counts_stay_balanced_when_merged() {
        let mut a = RunCounts::default();
        a.record(Classification::Create);
        a.record(Classification::Unchanged);
        let mut b = RunCounts::default();
        b.record(Classification::Update);
        b.record_failed(3);
        a.merge(b);
        assert_eq!(a.total, 6);
        assert_eq!(a.failed, 3);
        assert!(a.is_balanced());
    }

    #[test]
    fn stats_serialize_counts_flat() {
        let stats = SyncRunStats {
            run_id: Uuid::nil(),
            job: JobId::LandValue,
            mode: SyncMode::Delta,
            started_at: DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            finished_at: DateTime::parse_from_rfc3339("2026-02-24T12:00:05Z")
                .unwrap()
                .with_timezone(&Utc),
            counts: RunCounts {
                total: 2,
                created: 1,
                updated: 0,
                unchanged: 1,
                failed: 0,
            },
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["job"], "land-value");
        assert_eq!(value["mode"], "delta");
        assert_eq!(value["unchanged"], 1);
    }
}
