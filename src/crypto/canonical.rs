//! Deterministic byte encoding of license payloads.
//!
//! Canonical form is compact JSON with object keys sorted lexicographically
//! at every depth. Both signer and verifier re-derive it from the typed
//! payload, so field order and whitespace of any transport serialization
//! never reach the signature.

use crate::errors::LicenseResult;
use crate::protocol::models::LicensePayload;
use crate::LicenseError;
use serde_json::Value;

/// Canonical bytes of a payload, the exact input to signing and verification.
pub fn canonicalize(payload: &LicensePayload) -> LicenseResult<Vec<u8>> {
    let value = serde_json::to_value(payload)
        .map_err(|e| LicenseError::ProtocolError(format!("Failed to encode payload: {}", e)))?;
    canonical_bytes(&value)
}

/// Canonical bytes of arbitrary JSON text.
pub fn canonicalize_json(json: &str) -> LicenseResult<Vec<u8>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| LicenseError::ProtocolError(format!("Invalid JSON: {}", e)))?;
    canonical_bytes(&value)
}

fn canonical_bytes(value: &Value) -> LicenseResult<Vec<u8>> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out.into_bytes())
}

// Sorting is done here rather than relying on serde_json's map type, which
// keeps insertion order when `preserve_order` is enabled anywhere in the
// dependency graph.
fn write_canonical(value: &Value, out: &mut String) -> LicenseResult<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&encode_scalar(&Value::String((*key).clone()))?);
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&encode_scalar(scalar)?),
    }
    Ok(())
}

fn encode_scalar(value: &Value) -> LicenseResult<String> {
    serde_json::to_string(value)
        .map_err(|e| LicenseError::ProtocolError(format!("Failed to encode value: {}", e)))
}
