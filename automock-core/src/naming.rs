//! Deterministic mapping between project identifiers and storage keys/names.
//!
//! Pure functions only — nothing here touches the network. Mirrors how the
//! teacher keeps `shipcat_definitions::region`/`config` as plain data
//! lookups, with all I/O pushed to the caller.

use crate::error::{Error, Result};

/// Fixed namespace prefix for every bucket this system owns.
pub const STORAGE_PREFIX: &str = "auto-mock";

/// Suffix length in `generate_storage_name`, e.g. `-a1b2c3`.
const SUFFIX_LEN: usize = 6;

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Validates a base identifier: lowercase `[a-z0-9-]`, 3-40 chars.
pub fn validate_base(base: &str) -> Result<()> {
    if base.is_empty() {
        return Err(Error::validation("base", "must not be empty"));
    }
    if base.len() < 3 || base.len() > 40 {
        return Err(Error::validation(
            "base",
            format!("must be 3-40 chars, got {}", base.len()),
        ));
    }
    if !base
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(Error::validation(
            "base",
            "must only contain lowercase letters, digits, and '-'",
        ));
    }
    Ok(())
}

/// Produces `<prefix>-<base>-<6-char-base36>` using a cryptographic RNG.
/// Collisions are the caller's responsibility to detect and retry.
pub fn generate_storage_name(base: &str) -> Result<String> {
    validate_base(base)?;
    Ok(format!("{STORAGE_PREFIX}-{base}-{}", random_suffix()))
}

fn random_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..BASE36_ALPHABET.len());
            BASE36_ALPHABET[idx] as char
        })
        .collect()
}

/// Strips the fixed prefix and the trailing 7-char `-XXXXXX` suffix.
/// Idempotent: calling it on an already-stripped `base` returns `base`
/// unchanged.
pub fn extract_base(storage_name: &str) -> String {
    let prefix = format!("{STORAGE_PREFIX}-");
    let without_prefix = storage_name
        .strip_prefix(&prefix)
        .unwrap_or(storage_name);

    // Trailing "-XXXXXX" where XXXXXX is exactly SUFFIX_LEN base36 chars.
    if without_prefix.len() > SUFFIX_LEN + 1 {
        let (head, tail) = without_prefix.split_at(without_prefix.len() - (SUFFIX_LEN + 1));
        if tail.starts_with('-')
            && tail[1..]
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return head.to_string();
        }
    }
    without_prefix.to_string()
}

/// `configs/<base>/current.json`
pub fn mock_current_key(base: &str) -> String {
    format!("configs/{base}/current.json")
}

/// `configs/<base>/versions/v<unix>.json`
pub fn mock_version_key(base: &str, version: &str) -> String {
    format!("configs/{base}/versions/{version}.json")
}

/// `configs/{base}/versions/` listing prefix
pub fn mock_versions_prefix(base: &str) -> String {
    format!("configs/{base}/versions/")
}

/// `configs/{base}/` — everything belonging to the mock namespace.
pub fn mock_namespace_prefix(base: &str) -> String {
    format!("configs/{base}/")
}

/// `metadata/<base>.json`
pub fn mock_metadata_key(base: &str) -> String {
    format!("metadata/{base}.json")
}

fn loadtest_base(base: &str) -> String {
    format!("{base}-loadtest")
}

/// `configs/<base>-loadtest/current.json`
pub fn loadtest_current_key(base: &str) -> String {
    format!("configs/{}/current.json", loadtest_base(base))
}

/// `configs/<base>-loadtest/versions/v<unix>.json`
pub fn loadtest_version_key(base: &str, version: &str) -> String {
    format!("configs/{}/versions/{version}.json", loadtest_base(base))
}

/// `configs/{base}-loadtest/versions/` listing prefix
pub fn loadtest_versions_prefix(base: &str) -> String {
    format!("configs/{}/versions/", loadtest_base(base))
}

/// `configs/<base>-loadtest/bundles/<bid>/<name>`
pub fn loadtest_bundle_file_key(base: &str, bundle_id: &str, name: &str) -> String {
    format!(
        "configs/{}/bundles/{bundle_id}/{name}",
        loadtest_base(base)
    )
}

/// `configs/<base>-loadtest/bundles/<bid>/` — directory prefix for a bundle.
pub fn loadtest_bundle_dir(base: &str, bundle_id: &str) -> String {
    format!("configs/{}/bundles/{bundle_id}/", loadtest_base(base))
}

/// `configs/{base}-loadtest/` — everything belonging to the load-test
/// namespace (pointer, versions, bundles).
pub fn loadtest_namespace_prefix(base: &str) -> String {
    format!("configs/{}/", loadtest_base(base))
}

/// `metadata/<base>-loadtest.json`
pub fn loadtest_metadata_key(base: &str) -> String {
    format!("metadata/{}.json", loadtest_base(base))
}

/// `deployment-metadata.json` — one per bucket, mock stack.
pub fn deployment_metadata_key() -> &'static str {
    "deployment-metadata.json"
}

/// `deployment-metadata-loadtest.json` — one per bucket, load-test stack.
pub fn deployment_metadata_loadtest_key() -> &'static str {
    "deployment-metadata-loadtest.json"
}

/// `terraform/state/terraform.tfstate`
pub fn terraform_state_prefix() -> &'static str {
    "terraform/state/"
}

/// `terraform/loadtest/state/terraform.tfstate`
pub fn terraform_loadtest_state_prefix() -> &'static str {
    "terraform/loadtest/state/"
}

pub fn terraform_state_key() -> String {
    format!("{}terraform.tfstate", terraform_state_prefix())
}

pub fn terraform_loadtest_state_key() -> String {
    format!("{}terraform.tfstate", terraform_loadtest_state_prefix())
}

/// `"v" + unix_seconds`, the monotonic-in-practice version tag used for
/// both mock-config and load-test version snapshots.
pub fn version_tag(unix_seconds: u64) -> String {
    format!("v{unix_seconds}")
}

/// `"bndl_" + unix_nanos`, the bundle identifier.
pub fn bundle_id_tag(unix_nanos: u128) -> String {
    format!("bndl_{unix_nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_base() {
        assert!(validate_base("demo").is_ok());
        assert!(validate_base("de").is_err());
        assert!(validate_base("").is_err());
        assert!(validate_base(&"a".repeat(41)).is_err());
        assert!(validate_base("Demo").is_err());
        assert!(validate_base("demo_1").is_err());
    }

    #[test]
    fn generates_and_extracts_round_trip() {
        let name = generate_storage_name("demo").unwrap();
        assert!(name.starts_with("auto-mock-demo-"));
        assert_eq!(extract_base(&name), "demo");
    }

    #[test]
    fn extract_base_is_idempotent_on_stripped_input() {
        assert_eq!(extract_base("demo"), "demo");
        assert_eq!(extract_base(&extract_base("auto-mock-demo-a1b2c3")), "demo");
    }

    #[test]
    fn key_layout_matches_spec() {
        assert_eq!(mock_current_key("demo"), "configs/demo/current.json");
        assert_eq!(
            mock_version_key("demo", "v1700000000"),
            "configs/demo/versions/v1700000000.json"
        );
        assert_eq!(mock_metadata_key("demo"), "metadata/demo.json");
        assert_eq!(
            loadtest_current_key("demo"),
            "configs/demo-loadtest/current.json"
        );
        assert_eq!(
            loadtest_bundle_file_key("demo", "bndl_1", "locustfile.py"),
            "configs/demo-loadtest/bundles/bndl_1/locustfile.py"
        );
        assert_eq!(
            loadtest_metadata_key("demo"),
            "metadata/demo-loadtest.json"
        );
        assert_eq!(deployment_metadata_key(), "deployment-metadata.json");
        assert_eq!(
            deployment_metadata_loadtest_key(),
            "deployment-metadata-loadtest.json"
        );
        assert_eq!(terraform_state_key(), "terraform/state/terraform.tfstate");
        assert_eq!(
            terraform_loadtest_state_key(),
            "terraform/loadtest/state/terraform.tfstate"
        );
    }
}
