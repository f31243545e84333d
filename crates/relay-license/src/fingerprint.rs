use sha2::{Digest, Sha256};

const FINGERPRINT_LEN: usize = 16;

/// Stable identifier for this machine, sent as `hardware_id`.
///
/// First 16 hex characters of SHA-256 over `hostname-arch-os`.
pub fn hardware_fingerprint() -> String {
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    fingerprint_from(&host, std::env::consts::ARCH, std::env::consts::OS)
}

pub(crate) fn fingerprint_from(host: &str, arch: &str, os: &str) -> String {
    let digest = Sha256::digest(format!("{host}-{arch}-{os}").as_bytes());
    let mut hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_sixteen_lowercase_hex_chars() {
        let id = hardware_fingerprint();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_is_deterministic_and_input_sensitive() {
        let a = fingerprint_from("box", "x86_64", "linux");
        assert_eq!(a, fingerprint_from("box", "x86_64", "linux"));
        assert_ne!(a, fingerprint_from("box", "aarch64", "linux"));
    }

    #[test]
    fn fingerprint_matches_known_digest_prefix() {
        assert_eq!(fingerprint_from("a", "b", "c"), "cbd2be7b96f770a0");
    }
}
