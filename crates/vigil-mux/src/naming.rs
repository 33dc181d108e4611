use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use vigil_core::RunRef;

const VAULT_HASH_LEN: usize = 8;
const RUN_HASH_LEN: usize = 8;

/// Canonical form of a vault path: symlinks resolved when the path exists,
/// trailing separators dropped.
pub fn normalize_vault_path(vault: &Path) -> PathBuf {
    let resolved = vault
        .canonicalize()
        .unwrap_or_else(|_| vault.to_path_buf());
    let raw = resolved.to_string_lossy();
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

fn short_digest(parts: &[&[u8]], len: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(len);
    digest
}

pub fn vault_hash(vault: &Path) -> String {
    let normalized = normalize_vault_path(vault);
    short_digest(&[normalized.to_string_lossy().as_bytes()], VAULT_HASH_LEN)
}

/// `<prefix>-<8 hex chars>`; the same vault always maps to the same session.
pub fn dashboard_session_name(prefix: &str, vault: &Path) -> String {
    format!("{}-{}", sanitize_session_token(prefix), vault_hash(vault))
}

/// `<dashboard>-<issue>-<run>-<8 hex chars>`. The readable part is lossy
/// (sanitized, `-` is legal inside ids), so the suffix hashes the raw pair.
pub fn run_session_name(dashboard: &str, run: &RunRef) -> String {
    let digest = short_digest(
        &[run.issue_id.as_bytes(), b"\0".as_slice(), run.run_id.as_bytes()],
        RUN_HASH_LEN,
    );
    format!(
        "{dashboard}-{}-{}-{digest}",
        sanitize_session_token(&run.issue_id),
        sanitize_session_token(&run.run_id)
    )
}

/// tmux treats `.` and `:` as target separators; keep names to a safe subset.
fn sanitize_session_token(input: &str) -> String {
    let out: String = input
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "x".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn dashboard_name_is_stable_and_prefixed() {
        let a = dashboard_session_name("vigil", Path::new("/no/such/vault"));
        let b = dashboard_session_name("vigil", Path::new("/no/such/vault/"));
        assert_eq!(a, b);
        assert!(a.starts_with("vigil-"));
        let hash = a.trim_start_matches("vigil-");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_vaults_get_distinct_sessions() {
        assert_ne!(
            dashboard_session_name("vigil", Path::new("/no/such/vault-a")),
            dashboard_session_name("vigil", Path::new("/no/such/vault-b"))
        );
    }

    #[test]
    fn existing_vault_is_canonicalized_before_hashing() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let root = std::env::temp_dir().join(format!("vigil-mux-naming-{nanos}"));
        fs::create_dir_all(root.join("vault")).expect("create vault");
        let direct = root.join("vault");
        let dotted = root.join("vault").join("..").join("vault");
        assert_eq!(vault_hash(&direct), vault_hash(&dotted));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn run_session_name_replaces_tmux_separators() {
        let name = run_session_name("vigil-1a2b3c4d", &RunRef::new("ISS.7", "r:1 b"));
        let (readable, digest) = name.rsplit_once('-').expect("digest suffix");
        assert_eq!(readable, "vigil-1a2b3c4d-ISS_7-r_1_b");
        assert_eq!(digest.len(), 8);
        assert!(digest.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert!(!name.contains(['.', ':', ' ']));
        assert_eq!(sanitize_session_token("  "), "x");
    }

    #[test]
    fn run_session_names_are_distinct_per_run() {
        let dashboard = "vigil-0badcafe";
        let shifted_dash = [RunRef::new("ISS-1", "2-abc"), RunRef::new("ISS-1-2", "abc")];
        assert_ne!(
            run_session_name(dashboard, &shifted_dash[0]),
            run_session_name(dashboard, &shifted_dash[1])
        );

        let same_after_sanitizing = [RunRef::new("ISS.7", "r1"), RunRef::new("ISS_7", "r1")];
        assert_ne!(
            run_session_name(dashboard, &same_after_sanitizing[0]),
            run_session_name(dashboard, &same_after_sanitizing[1])
        );

        let run = RunRef::new("ISS-1", "r1");
        assert_eq!(
            run_session_name(dashboard, &run),
            run_session_name(dashboard, &run)
        );
    }
}
