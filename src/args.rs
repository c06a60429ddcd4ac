//! Parsing helpers for CLI arguments

use agentmolt_core::{Error, Metadata, Result};
use serde_json::Value;

/// Parse `key=value` pairs into metadata. Values that parse as JSON keep
/// their type (`n=3` is a number); anything else is stored as a string.
pub fn parse_metadata(pairs: &[String]) -> Result<Metadata> {
    let mut meta = Metadata::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| Error::validation(format!("metadata must be key=value, got {pair:?}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::validation(format!("metadata key is empty in {pair:?}")));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        meta.insert(key.to_string(), value);
    }
    Ok(meta)
}
