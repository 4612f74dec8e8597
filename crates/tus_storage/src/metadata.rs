//! Codec for the `Upload-Metadata` / `Upload-Concat` wire encoding: a
//! comma-separated list of `key base64(value)` pairs, or a bare `key` for
//! values with no associated data.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use tus_errors::ErrorMetadata;

pub fn parse_upload_metadata(header: &str) -> anyhow::Result<IndexMap<String, String>> {
    let mut out = IndexMap::new();
    for pair in header.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, ' ');
        let key = parts.next().unwrap_or("").to_string();
        if key.is_empty() {
            return Err(ErrorMetadata::invalid_metadata("empty metadata key").into());
        }
        if out.contains_key(&key) {
            return Err(ErrorMetadata::invalid_metadata(format!("duplicate metadata key: {key}")).into());
        }
        match parts.next() {
            Some(encoded) => {
                let decoded = BASE64
                    .decode(encoded)
                    .map_err(|e| ErrorMetadata::invalid_metadata(format!("bad base64: {e}")))?;
                let value = String::from_utf8(decoded)
                    .map_err(|_| ErrorMetadata::invalid_metadata("metadata value is not utf-8"))?;
                out.insert(key, value);
            },
            None => {
                out.insert(key, String::new());
            },
        }
    }
    Ok(out)
}

pub fn encode_upload_metadata(metadata: &IndexMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{k} {}", BASE64.encode(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_and_parse() {
        let mut meta = IndexMap::new();
        meta.insert("filename".to_string(), "world_domination_plan.pdf".to_string());
        meta.insert("is_confidential".to_string(), String::new());
        let encoded = encode_upload_metadata(&meta);
        let parsed = parse_upload_metadata(&encoded).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(parse_upload_metadata("filename not-valid-base64!!!").is_err());
    }

    #[test]
    fn ignores_blank_segments() {
        let parsed = parse_upload_metadata("filename d29ybGQ=,,").unwrap();
        assert_eq!(parsed.get("filename").unwrap(), "world");
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = parse_upload_metadata("filename d29ybGQ=,filename aGVsbG8=").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ErrorMetadata>().unwrap().code,
            tus_errors::ErrorCode::InvalidMetadata
        );
    }
}
