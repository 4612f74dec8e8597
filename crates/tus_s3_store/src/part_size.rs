use tus_errors::ErrorMetadata;

/// S3's hard limits: every part but the last must be at least 5 MiB, and a
/// multipart upload may have at most 10,000 parts.
pub const MIN_PART_SIZE: i64 = 5 * 1024 * 1024;
pub const MAX_MULTIPART_PARTS: i64 = 10_000;

#[derive(Clone, Copy, Debug)]
pub struct PartSizeConfig {
    pub preferred_part_size: i64,
    pub max_part_size: i64,
    pub max_multipart_parts: i64,
}

impl Default for PartSizeConfig {
    fn default() -> Self {
        Self {
            preferred_part_size: 50 * 1024 * 1024,
            max_part_size: 5 * 1024 * 1024 * 1024,
            max_multipart_parts: MAX_MULTIPART_PARTS,
        }
    }
}

/// Computes the part size to use for an upload of `size` bytes, or for a
/// deferred-length upload when `size` is `None` (in which case the
/// preferred size is used unconditionally).
pub fn optimal_part_size(size: Option<i64>, cfg: &PartSizeConfig) -> anyhow::Result<i64> {
    let Some(size) = size else {
        return Ok(cfg.preferred_part_size);
    };

    let optimal = if size <= cfg.preferred_part_size {
        cfg.preferred_part_size
    } else if size <= cfg.preferred_part_size * cfg.max_multipart_parts {
        cfg.preferred_part_size
    } else if size % cfg.max_multipart_parts == 0 {
        size / cfg.max_multipart_parts
    } else {
        size / cfg.max_multipart_parts + 1
    };

    if optimal > cfg.max_part_size {
        return Err(ErrorMetadata::upload_too_large(format!(
            "upload of {size} bytes would require a part size of {optimal}, exceeding the \
             maximum of {}",
            cfg.max_part_size
        ))
        .into());
    }

    debug_assert!(optimal >= MIN_PART_SIZE);
    debug_assert!(optimal <= cfg.max_part_size);
    debug_assert!(size.div_ceil(optimal) <= cfg.max_multipart_parts);

    Ok(optimal)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn small_upload_uses_preferred_size() {
        let cfg = PartSizeConfig::default();
        assert_eq!(optimal_part_size(Some(1024), &cfg).unwrap(), cfg.preferred_part_size);
    }

    #[test]
    fn deferred_length_uses_preferred_size() {
        let cfg = PartSizeConfig::default();
        assert_eq!(optimal_part_size(None, &cfg).unwrap(), cfg.preferred_part_size);
    }

    #[test]
    fn huge_upload_scales_part_size_up() {
        let cfg = PartSizeConfig::default();
        let size = cfg.preferred_part_size * cfg.max_multipart_parts + 1;
        let optimal = optimal_part_size(Some(size), &cfg).unwrap();
        assert!(optimal > cfg.preferred_part_size);
        assert!(size.div_ceil(optimal) <= cfg.max_multipart_parts);
    }

    #[test]
    fn upload_exceeding_max_part_size_is_rejected() {
        let cfg = PartSizeConfig {
            max_part_size: 10 * 1024 * 1024,
            ..Default::default()
        };
        let size = cfg.preferred_part_size * cfg.max_multipart_parts * 1000;
        assert!(optimal_part_size(Some(size), &cfg).is_err());
    }

    proptest! {
        #[test]
        fn optimal_size_always_within_bounds(size in 1i64..(200 * 1024 * 1024 * 1024)) {
            let cfg = PartSizeConfig::default();
            if let Ok(optimal) = optimal_part_size(Some(size), &cfg) {
                prop_assert!(optimal <= cfg.max_part_size);
                prop_assert!(size.div_ceil(optimal) <= cfg.max_multipart_parts);
            }
        }
    }
}
