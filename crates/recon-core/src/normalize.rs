//! Raw remote payloads to canonical field maps, plus the content fingerprint.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::monetary::MonetaryTextParser;
use crate::{
    CanonicalRecord, ContractPayload, FieldValue, Fields, LandValuePayload, RawAmount,
    RecordPayload, RemoteRecord, ReservationPayload, StatusChange,
};

/// Maps remote records into canonical shape. Side-effect free.
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    monetary: MonetaryTextParser,
}

impl RecordNormalizer {
    pub fn new(monetary: MonetaryTextParser) -> Self {
        Self { monetary }
    }

    pub fn normalize(&self, record: &RemoteRecord) -> CanonicalRecord {
        let fields = match &record.payload {
            RecordPayload::Reservation(p) => reservation_fields(p),
            RecordPayload::Contract(p) => contract_fields(p),
            RecordPayload::LandValue(p) => self.land_value_fields(p),
        };
        CanonicalRecord {
            remote_id: record.remote_id.trim().to_string(),
            content_hash: content_hash(&fields),
            fields,
            first_seen_at: None,
            last_seen_at: None,
        }
    }

    fn land_value_fields(&self, payload: &LandValuePayload) -> Fields {
        let extracted = self.monetary.extract_value(&payload.blocks);
        let mut fields = Fields::new();
        fields.insert(
            "land_value_text".into(),
            FieldValue::text(extracted.text.as_deref()),
        );
        fields.insert(
            "land_value".into(),
            extracted
                .value
                .map(|v| FieldValue::Decimal(v.normalize()))
                .unwrap_or(FieldValue::Null),
        );
        fields
    }
}

fn reservation_fields(p: &ReservationPayload) -> Fields {
    let mut history: Vec<(FieldValue, String)> = p
        .status_history
        .iter()
        .map(|change: &StatusChange| {
            (instant_field(Some(&change.changed_at)), clean_text(&change.status))
        })
        .collect();
    history.sort_by(|a, b| {
        sort_key(&a.0)
            .cmp(&sort_key(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut fields = Fields::new();
    fields.insert("unit_code".into(), text_field(p.unit_code.as_deref()));
    fields.insert("customer_name".into(), text_field(p.customer_name.as_deref()));
    fields.insert("broker_id".into(), integer_field(p.broker_id));
    fields.insert("manager_id".into(), integer_field(p.manager_id));
    fields.insert("status".into(), text_field(p.status.as_deref()));
    fields.insert(
        "status_history".into(),
        FieldValue::List(
            history
                .into_iter()
                .map(|(changed_at, status)| {
                    FieldValue::Map(BTreeMap::from([
                        ("changed_at".to_string(), changed_at),
                        ("status".to_string(), FieldValue::Text(status)),
                    ]))
                })
                .collect(),
        ),
    );
    fields.insert("price".into(), amount_field(p.price.as_ref()));
    fields.insert("reserved_at".into(), instant_field(p.reserved_at.as_deref()));
    fields
}

fn contract_fields(p: &ContractPayload) -> Fields {
    let mut fields = Fields::new();
    fields.insert("contract_number".into(), text_field(p.contract_number.as_deref()));
    fields.insert(
        "customer_document".into(),
        match p.customer_document.as_deref() {
            Some(doc) => FieldValue::Text(doc.chars().filter(char::is_ascii_digit).collect()),
            None => FieldValue::Text(String::new()),
        },
    );
    fields.insert("unit_code".into(), text_field(p.unit_code.as_deref()));
    fields.insert("total_value".into(), amount_field(p.total_value.as_ref()));
    fields.insert("signed_on".into(), instant_field(p.signed_on.as_deref()));
    fields.insert("installments".into(), FieldValue::Integer(p.installments.unwrap_or(0)));
    fields.insert("active".into(), FieldValue::Bool(p.active.unwrap_or(false)));
    fields
}

/// SHA-256 over the key-sorted JSON serialization of the field map.
pub fn content_hash(fields: &Fields) -> String {
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut hasher, fields).expect("field maps always serialize");
    hex::encode(hasher.finalize())
}

fn sort_key(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Instant(at) => Some(*at),
        _ => None,
    }
}

fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn text_field(value: Option<&str>) -> FieldValue {
    FieldValue::Text(value.map(clean_text).unwrap_or_default())
}

fn integer_field(value: Option<i64>) -> FieldValue {
    value.map(FieldValue::Integer).unwrap_or(FieldValue::Null)
}

fn amount_field(value: Option<&RawAmount>) -> FieldValue {
    let parsed = match value {
        Some(RawAmount::Integer(v)) => Some(Decimal::from(*v)),
        Some(RawAmount::Float(v)) => Decimal::try_from(*v).ok(),
        Some(RawAmount::Text(v)) => parse_decimal_text(v),
        None => None,
    };
    parsed
        .map(|d| FieldValue::Decimal(d.normalize()))
        .unwrap_or(FieldValue::Null)
}

fn instant_field(value: Option<&str>) -> FieldValue {
    value
        .and_then(parse_instant)
        .map(FieldValue::Instant)
        .unwrap_or(FieldValue::Null)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and `DD/MM/YYYY`.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(at.and_utc());
    }
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

/// Parses a numeric string in either `1.234,56` or `1234.56` form.
///
/// With a comma present the last comma is the decimal separator. A single dot
/// followed by at most two digits is a decimal point; any other dots group thousands.
pub fn parse_decimal_text(value: &str) -> Option<Decimal> {
    let compact: String = value
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !compact.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let canonical = if let Some(pos) = compact.rfind(',') {
        let whole: String = compact[..pos].chars().filter(|c| *c != '.' && *c != ',').collect();
        format!("{whole}.{}", &compact[pos + 1..])
    } else {
        let dots = compact.matches('.').count();
        let decimals = compact.rsplit('.').next().map(str::len).unwrap_or(0);
        if dots == 1 && decimals <= 2 {
            compact
        } else {
            compact.replace('.', "")
        }
    };
    Decimal::from_str(&canonical).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(payload: ReservationPayload) -> RemoteRecord {
        RemoteRecord {
            remote_id: " 42 ".into(),
            modified_at: None,
            payload: RecordPayload::Reservation(payload),
        }
    }

    #[test]
    fn hash_ignores_key_insertion_order() {
        let mut a = Fields::new();
        a.insert("b".into(), FieldValue::Integer(2));
        a.insert("a".into(), FieldValue::Text("x".into()));
        let mut b = Fields::new();
        b.insert("a".into(), FieldValue::Text("x".into()));
        b.insert("b".into(), FieldValue::Integer(2));
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_distinguishes_value_types() {
        let mut a = Fields::new();
        a.insert("n".into(), FieldValue::Text("1".into()));
        let mut b = Fields::new();
        b.insert("n".into(), FieldValue::Integer(1));
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_ignores_modified_marker_and_json_field_order() {
        let normalizer = RecordNormalizer::default();
        let first: RemoteRecord = serde_json::from_value(serde_json::json!({
            "remote_id": "7",
            "modified_at": "2026-01-01T00:00:00Z",
            "payload": {"kind": "reservation", "unit_code": "A-101", "price": "350.000,00", "status": "active"}
        }))
        .unwrap();
        let second: RemoteRecord = serde_json::from_value(serde_json::json!({
            "remote_id": "7",
            "modified_at": "2026-03-01T10:00:00Z",
            "payload": {"status": "active", "price": 350000, "kind": "reservation", "unit_code": " A-101 "}
        }))
        .unwrap();
        assert_eq!(
            normalizer.normalize(&first).content_hash,
            normalizer.normalize(&second).content_hash
        );
    }

    #[test]
    fn status_history_order_does_not_change_hash() {
        let normalizer = RecordNormalizer::default();
        let a = StatusChange {
            status: "reserved".into(),
            changed_at: "2026-01-01".into(),
        };
        let b = StatusChange {
            status: "signed".into(),
            changed_at: "02/01/2026".into(),
        };
        let one = normalizer.normalize(&reservation(ReservationPayload {
            status_history: vec![a.clone(), b.clone()],
            ..Default::default()
        }));
        let two = normalizer.normalize(&reservation(ReservationPayload {
            status_history: vec![b, a],
            ..Default::default()
        }));
        assert_eq!(one.content_hash, two.content_hash);
        assert_eq!(one.remote_id, "42");
    }

    #[test]
    fn missing_optional_fields_get_deterministic_defaults() {
        let record = RemoteRecord {
            remote_id: "C-1".into(),
            modified_at: None,
            payload: RecordPayload::Contract(ContractPayload::default()),
        };
        let canonical = RecordNormalizer::default().normalize(&record);
        assert_eq!(canonical.fields["installments"], FieldValue::Integer(0));
        assert_eq!(canonical.fields["active"], FieldValue::Bool(false));
        assert_eq!(canonical.fields["total_value"], FieldValue::Null);
        assert_eq!(canonical.fields["contract_number"], FieldValue::Text(String::new()));
    }

    #[test]
    fn land_value_runs_the_monetary_parser() {
        let record = RemoteRecord {
            remote_id: "900".into(),
            modified_at: None,
            payload: RecordPayload::LandValue(LandValuePayload {
                blocks: vec!["TR - R$ 12.840,41".into()],
            }),
        };
        let canonical = RecordNormalizer::default().normalize(&record);
        assert_eq!(
            canonical.fields["land_value"].as_decimal(),
            Some(Decimal::from_str("12840.41").unwrap())
        );

        let empty = RemoteRecord {
            payload: RecordPayload::LandValue(LandValuePayload {
                blocks: vec!["sem valor".into()],
            }),
            ..record
        };
        let canonical = RecordNormalizer::default().normalize(&empty);
        assert_eq!(canonical.fields["land_value"], FieldValue::Null);
        assert_eq!(canonical.fields["land_value_text"], FieldValue::Null);
    }

    #[test]
    fn dates_and_numbers_are_coerced() {
        assert_eq!(
            parse_instant("24/02/2026"),
            parse_instant("2026-02-24T00:00:00Z")
        );
        assert_eq!(parse_instant("not a date"), None);
        assert_eq!(parse_decimal_text("1.234,50"), Decimal::from_str("1234.50").ok());
        assert_eq!(parse_decimal_text("1234.5"), Decimal::from_str("1234.5").ok());
        assert_eq!(parse_decimal_text("1.234.567"), Decimal::from_str("1234567").ok());
        assert_eq!(parse_decimal_text("n/a"), None);
    }
}
