use rand::RngCore;
use rand::rngs::OsRng;

/// Generates an unguessable 8 hex-character upload id. Collision is left to
/// the data store's create path (fail and retry), same as tusd's generator.
pub fn generate_upload_id() -> String {
    let mut buf = [0u8; 4];
    OsRng.fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_eight_lowercase_hex_chars() {
        let id = generate_upload_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn is_not_trivially_constant() {
        let a = generate_upload_id();
        let b = generate_upload_id();
        assert_ne!(a, b);
    }
}
