//! Local change classification against the stored fingerprint.

use serde::{Deserialize, Serialize};

use crate::CanonicalRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Create,
    Update,
    Unchanged,
}

/// Compares the freshly computed hash with the one already in the canonical store.
///
/// Never consults the remote system, so a rerun without remote changes always
/// classifies every record as unchanged.
pub fn classify(record: &CanonicalRecord, stored_hash: Option<&str>) -> Classification {
    match stored_hash {
        None => Classification::Create,
        Some(hash) if hash == record.content_hash => Classification::Unchanged,
        Some(_) => Classification::Update,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fields;

    fn record(hash: &str) -> CanonicalRecord {
        CanonicalRecord {
            remote_id: "r-1".into(),
            fields: Fields::new(),
            content_hash: hash.into(),
            first_seen_at: None,
            last_seen_at: None,
        }
    }

    #[test]
    fn absent_hash_is_a_create() {
        assert_eq!(classify(&record("abc"), None), Classification::Create);
    }

    #[test]
    fn equal_hash_is_unchanged() {
        assert_eq!(classify(&record("abc"), Some("abc")), Classification::Unchanged);
    }

    #[test]
    fn different_hash_is_an_update() {
        assert_eq!(classify(&record("abc"), Some("abd")), Classification::Update);
    }
}
