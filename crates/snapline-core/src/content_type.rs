//! Content types for metric payloads handed to processors and publishers.
//!
//! Names are `<family>.<codec>`; `<family>.*` means "pick the binary codec".

use crate::error::{Result, SnapError};
use crate::metric::Metric;

pub const ANY: &str = "snapline.*";
pub const BINARY: &str = "snapline.bin";
pub const JSON: &str = "snapline.json";

/// `family.codec` where both parts are `[a-z0-9*]+`.
pub fn is_well_formed(ct: &str) -> bool {
    let Some((family, codec)) = ct.split_once('.') else {
        return false;
    };
    let ok = |s: &str| {
        !s.is_empty()
            && s
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'*')
    };
    ok(family) && ok(codec)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Binary,
    Json,
}

fn family(ct: &str) -> Result<Family> {
    match ct {
        ANY | BINARY => Ok(Family::Binary),
        JSON => Ok(Family::Json),
        other => Err(SnapError::ContentType(format!(
            "invalid snapline content type: {other}"
        ))),
    }
}

/// Encode `metrics` as `content_type`. Returns the payload and the concrete
/// content type used (`snapline.*` resolves to `snapline.bin`).
pub fn marshal_metrics(content_type: &str, metrics: &[Metric]) -> Result<(Vec<u8>, String)> {
    if metrics.is_empty() {
        return Err(SnapError::ContentType(
            "attempt to marshal empty slice of metrics".into(),
        ));
    }
    match family(content_type)? {
        Family::Binary => {
            let bytes =
                bincode::serialize(metrics).map_err(|e| SnapError::Internal(e.to_string()))?;
            Ok((bytes, BINARY.to_string()))
        }
        Family::Json => {
            let bytes =
                serde_json::to_vec(metrics).map_err(|e| SnapError::Internal(e.to_string()))?;
            Ok((bytes, JSON.to_string()))
        }
    }
}

pub fn unmarshal_metrics(content_type: &str, payload: &[u8]) -> Result<Vec<Metric>> {
    match family(content_type)? {
        Family::Binary => {
            bincode::deserialize(payload).map_err(|e| SnapError::Decode(e.to_string()))
        }
        Family::Json => {
            serde_json::from_slice(payload).map_err(|e| SnapError::Decode(e.to_string()))
        }
    }
}

/// Re-encode `payload` from one content type to another.
pub fn swap_content_type(from: &str, to: &str, payload: &[u8]) -> Result<(Vec<u8>, String)> {
    let metrics = unmarshal_metrics(from, payload)?;
    marshal_metrics(to, &metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_names() {
        assert!(is_well_formed("snapline.*"));
        assert!(is_well_formed("snapline.json"));
        assert!(is_well_formed("a1.b2"));
        assert!(!is_well_formed("snapline"));
        assert!(!is_well_formed("Snapline.json"));
        assert!(!is_well_formed("snapline.js-on"));
        assert!(!is_well_formed(".json"));
        assert!(!is_well_formed("a.b.c"));
    }
}
