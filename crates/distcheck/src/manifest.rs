use crate::error::{DistCheckError, Result};
use serde::{Deserialize, Serialize};

/// Cleartext checksum manifest, relative to a version URL.
pub const CLEARTEXT_MANIFEST: &str = "SHASUMS256.txt";
/// Signed copy of the checksum manifest.
pub const SIGNED_MANIFEST: &str = "SHASUMS256.txt.asc";
/// Public key the signed manifest is checked against.
pub const PUBLIC_KEY: &str = "SHASUMS256.txt.gpg";

/// One `<checksum> <filepath>` line of a checksum manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Hex encoded SHA-256 digest of the file.
    pub checksum: String,
    /// Path of the file relative to the version URL.
    pub filepath: String,
}

impl ManifestEntry {
    /// Parse a single manifest line. Blank lines yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let mut fields = line.split_whitespace();
        let Some(checksum) = fields.next() else {
            return Ok(None);
        };
        let filepath = fields
            .next()
            .ok_or_else(|| DistCheckError::MalformedManifest {
                line: line.to_string(),
            })?;
        Ok(Some(Self {
            checksum: checksum.to_string(),
            filepath: filepath.to_string(),
        }))
    }

    /// Whether `actual` names the same digest, ignoring hex case.
    pub fn matches(&self, actual: &str) -> bool {
        self.checksum.eq_ignore_ascii_case(actual)
    }
}

/// Split a trusted manifest into entries, keeping source order.
pub fn parse_manifest(body: &str) -> Result<Vec<ManifestEntry>> {
    body.trim()
        .lines()
        .filter_map(|line| ManifestEntry::parse_line(line).transpose())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_A: &str = "a3f1c2d4e5b6a7980123456789abcdef0123456789abcdef0123456789abcdef";
    const DIGEST_B: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn parses_lines_in_order() {
        let body = format!(
            "{DIGEST_A}  iojs-v1.2.0-darwin-x64.tar.gz\n\n  {DIGEST_B}\tiojs-v1.2.0.tar.xz  \n"
        );
        let entries = parse_manifest(&body).unwrap();
        assert_eq!(
            entries,
            vec![
                ManifestEntry {
                    checksum: DIGEST_A.into(),
                    filepath: "iojs-v1.2.0-darwin-x64.tar.gz".into(),
                },
                ManifestEntry {
                    checksum: DIGEST_B.into(),
                    filepath: "iojs-v1.2.0.tar.xz".into(),
                },
            ]
        );
    }

    #[test]
    fn line_without_filepath_is_malformed() {
        let err = parse_manifest(DIGEST_A).unwrap_err();
        assert!(matches!(err, DistCheckError::MalformedManifest { .. }));
    }

    #[test]
    fn empty_manifest_has_no_entries() {
        assert!(parse_manifest("\n \n").unwrap().is_empty());
    }

    #[test]
    fn checksum_match_ignores_hex_case() {
        let entry = ManifestEntry::parse_line(&format!("{DIGEST_A} file"))
            .unwrap()
            .unwrap();
        assert!(entry.matches(&DIGEST_A.to_ascii_uppercase()));
        assert!(!entry.matches(DIGEST_B));
    }
}
