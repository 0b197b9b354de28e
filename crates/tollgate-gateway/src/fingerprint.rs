//! Request fingerprints: the cache and coalescing key.
//!
//! A fingerprint is a BLAKE3 hash of the capability name and a canonical
//! encoding of the arguments. Object keys are sorted at every depth, so two
//! argument maps that differ only in key order share a fingerprint.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Arguments;

/// Key-derivation context separating fingerprints from any other BLAKE3 use.
const DOMAIN: &str = "tollgate 2026-01 request fingerprint v1";

/// Identity of a (capability, arguments) pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a request.
    #[must_use]
    pub fn of(capability: &str, arguments: &Arguments) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(DOMAIN);
        write_str(&mut hasher, capability);
        write_object(&mut hasher, arguments);
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for logs.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Each value is written as a one-byte tag followed by a length-prefixed body
// so that no two distinct values share an encoding.

fn write_len(hasher: &mut blake3::Hasher, len: usize) {
    hasher.update(&u64::try_from(len).unwrap_or(u64::MAX).to_le_bytes());
}

fn write_str(hasher: &mut blake3::Hasher, s: &str) {
    write_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn write_object(hasher: &mut blake3::Hasher, object: &Arguments) {
    let mut keys: Vec<&String> = object.keys().collect();
    keys.sort_unstable();
    hasher.update(b"o");
    write_len(hasher, keys.len());
    for key in keys {
        write_str(hasher, key);
        if let Some(value) = object.get(key) {
            write_value(hasher, value);
        }
    }
}

fn write_value(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(b"n");
        },
        Value::Bool(b) => {
            hasher.update(if *b { b"t" } else { b"f" });
        },
        Value::Number(n) => {
            hasher.update(b"d");
            write_str(hasher, &n.to_string());
        },
        Value::String(s) => {
            hasher.update(b"s");
            write_str(hasher, s);
        },
        Value::Array(items) => {
            hasher.update(b"a");
            write_len(hasher, items.len());
            for item in items {
                write_value(hasher, item);
            }
        },
        Value::Object(object) => write_object(hasher, object),
    }
}
