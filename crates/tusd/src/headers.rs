use axum::http::HeaderMap;
use tus_errors::ErrorMetadata;

pub const TUS_RESUMABLE: &str = "1.0.0";

pub fn check_tus_version(headers: &HeaderMap) -> anyhow::Result<()> {
    if let Some(v) = headers.get("Tus-Resumable") {
        let v = v.to_str().unwrap_or_default();
        if v != TUS_RESUMABLE {
            return Err(ErrorMetadata::version_mismatch(format!(
                "unsupported Tus-Resumable version: {v}"
            ))
            .into());
        }
    }
    Ok(())
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn header_i64(headers: &HeaderMap, name: &str) -> anyhow::Result<Option<i64>> {
    match header_str(headers, name) {
        Some(v) => Ok(Some(v.parse().map_err(|_| {
            ErrorMetadata::invalid_metadata(format!("{name} header is not an integer"))
        })?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone)]
pub enum UploadConcat {
    Partial,
    Final(Vec<String>),
}

/// `Upload-Concat: partial` or `Upload-Concat: final;<space-separated URLs>`.
/// Partial ids are the last path segment of each URL.
pub fn parse_upload_concat(header: &str) -> anyhow::Result<UploadConcat> {
    if header == "partial" {
        return Ok(UploadConcat::Partial);
    }
    let rest = header
        .strip_prefix("final;")
        .ok_or_else(|| ErrorMetadata::invalid_concat(format!("malformed Upload-Concat: {header}")))?;
    let ids = rest
        .split_whitespace()
        .map(|url| {
            url.rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ErrorMetadata::invalid_concat(format!("malformed partial URL: {url}")).into())
        })
        .collect::<anyhow::Result<Vec<String>>>()?;
    if ids.is_empty() {
        return Err(ErrorMetadata::invalid_concat("final upload lists no partials").into());
    }
    Ok(UploadConcat::Final(ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial() {
        assert!(matches!(parse_upload_concat("partial").unwrap(), UploadConcat::Partial));
    }

    #[test]
    fn parses_final_urls_into_ids() {
        let concat = parse_upload_concat("final;/files/aaa /files/bbb").unwrap();
        match concat {
            UploadConcat::Final(ids) => assert_eq!(ids, vec!["aaa", "bbb"]),
            _ => panic!("expected Final"),
        }
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(parse_upload_concat("garbage").is_err());
    }
}
