//! Canonical collection checksums.
//!
//! Client and server hash the same canonical form, so equal content always
//! yields equal checksums regardless of element order, key order or audit
//! metadata:
//!
//! 1. Elements are sorted by `id`.
//! 2. Audit fields (`updated_at`, `updated_by`) are removed, and for cards
//!    the per-device schedule fields (`due_date`, `difficulty`) too.
//! 3. Each element is encoded as compact JSON with object keys in sorted
//!    order, and the array of elements is hashed with SHA-256.

use crate::conflict::AUDIT_FIELDS;
use cardsync_core::{entity_id, EntityType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Card fields derived from the local schedule.
pub const CARD_SCHEDULE_FIELDS: [&str; 2] = ["due_date", "difficulty"];

/// Checksums of the collections compared by consistency validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChecksums {
    /// Checksum of the documents collection.
    pub document: String,
    /// Checksum of the cards collection.
    pub card: String,
    /// Checksum of the SRS states collection.
    pub srs: String,
}

impl EntityChecksums {
    /// Computes all checksums.
    #[must_use]
    pub fn compute(documents: &[Value], cards: &[Value], srs_states: &[Value]) -> Self {
        Self {
            document: collection_checksum(EntityType::Document, documents),
            card: collection_checksum(EntityType::Card, cards),
            srs: collection_checksum(EntityType::SrsState, srs_states),
        }
    }

    /// Names the collections whose checksums differ.
    #[must_use]
    pub fn mismatches(&self, other: &Self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.document != other.document {
            names.push("document");
        }
        if self.card != other.card {
            names.push("card");
        }
        if self.srs != other.srs {
            names.push("srs");
        }
        names
    }
}

/// Returns the hex SHA-256 of a collection's canonical form.
#[must_use]
pub fn collection_checksum(entity_type: EntityType, items: &[Value]) -> String {
    let mut canonical: Vec<(&str, Value)> = items
        .iter()
        .map(|item| (entity_id(item).unwrap_or(""), strip(entity_type, item)))
        .collect();
    canonical.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    hasher.update(b"[");
    for (index, (_, item)) in canonical.iter().enumerate() {
        if index > 0 {
            hasher.update(b",");
        }
        hasher.update(canonical_json(item).as_bytes());
    }
    hasher.update(b"]");
    hex::encode(hasher.finalize())
}

/// Encodes a value as compact JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&fields[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn strip(entity_type: EntityType, item: &Value) -> Value {
    let Value::Object(fields) = item else {
        return item.clone();
    };
    let stripped: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| {
            let key = key.as_str();
            !AUDIT_FIELDS.contains(&key)
                && !(entity_type == EntityType::Card && CARD_SCHEDULE_FIELDS.contains(&key))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(stripped)
}
