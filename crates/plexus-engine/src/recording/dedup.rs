//! Asset and long-string deduplication for serialized recordings
//!
//! Binary payloads (`{"$bytes": "<base64>"}`) become `$ASSET:<sha256>`
//! references; long strings become `$STRING:<fnv1a-32>` references. Strings
//! that already carry either prefix are always interned so a literal can
//! never be mistaken for a reference on load.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::constants::recording::{ASSET_PREFIX, STRING_PREFIX};
use crate::error::{EngineError, Result};
use crate::value::BYTES_KEY;

/// Lookup tables stored next to a serialized recording
#[derive(Debug, Default)]
pub(crate) struct Interner {
    threshold: usize,
    pub assets: BTreeMap<String, String>,
    pub strings: BTreeMap<String, String>,
}

impl Interner {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Replace blobs and long strings in `value` with references
    pub fn intern(&mut self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                if let Some(encoded) = bytes_payload(map) {
                    let reference = self.intern_asset(encoded.to_string());
                    *value = Value::String(reference);
                    return;
                }
                for child in map.values_mut() {
                    self.intern(child);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.intern(item);
                }
            }
            Value::String(s) => {
                if s.chars().count() > self.threshold
                    || s.starts_with(ASSET_PREFIX)
                    || s.starts_with(STRING_PREFIX)
                {
                    let reference = self.intern_string(std::mem::take(s));
                    *value = Value::String(reference);
                }
            }
            _ => {}
        }
    }

    fn intern_asset(&mut self, encoded: String) -> String {
        let id = hex(&Sha256::digest(encoded.as_bytes()));
        self.assets.entry(id.clone()).or_insert(encoded);
        format!("{}{}", ASSET_PREFIX, id)
    }

    fn intern_string(&mut self, s: String) -> String {
        let mut hash = fnv1a_32(s.as_bytes());
        loop {
            let key = format!("{:08x}", hash);
            match self.strings.get(&key) {
                Some(existing) if *existing == s => return format!("{}{}", STRING_PREFIX, key),
                // Collision: probe the next key
                Some(_) => hash = hash.wrapping_add(1),
                None => {
                    self.strings.insert(key.clone(), s);
                    return format!("{}{}", STRING_PREFIX, key);
                }
            }
        }
    }
}

/// Replace every reference in `value` with the table entry it names
pub(crate) fn resolve(
    value: &mut Value,
    assets: &BTreeMap<String, String>,
    strings: &BTreeMap<String, String>,
) -> Result<()> {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                resolve(child, assets, strings)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve(item, assets, strings)?;
            }
        }
        Value::String(s) => {
            if let Some(id) = s.strip_prefix(ASSET_PREFIX) {
                let encoded = assets
                    .get(id)
                    .ok_or_else(|| EngineError::Recording(format!("unknown asset '{}'", id)))?;
                let mut map = serde_json::Map::new();
                map.insert(BYTES_KEY.to_string(), Value::String(encoded.clone()));
                *value = Value::Object(map);
            } else if let Some(key) = s.strip_prefix(STRING_PREFIX) {
                let original = strings
                    .get(key)
                    .ok_or_else(|| EngineError::Recording(format!("unknown string '{}'", key)))?;
                *value = Value::String(original.clone());
            }
        }
        _ => {}
    }
    Ok(())
}

fn bytes_payload(map: &serde_json::Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get(BYTES_KEY).and_then(Value::as_str)
}

/// 32-bit FNV-1a
fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193)
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
