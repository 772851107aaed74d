//! Selection of the newest approved release from a distribution index.

use std::cmp::Ordering;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    approval::ApproveVersion,
    error::{DistCheckError, Result},
    fetcher::{join_url, DistFetcher},
};

/// File listing every published release, relative to the distribution URL.
pub const INDEX_FILE: &str = "index.json";

/// One release listed in the distribution index.
///
/// Only `version` is interpreted; every other field is kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistEntry {
    /// Version string as published, possibly with a tag prefix such as `v`.
    pub version: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl DistEntry {
    /// Create an entry with no metadata.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Parse the semantic version with any tag prefix stripped.
    pub fn parsed_version(&self) -> Result<Version> {
        parse_version(&self.version)
    }
}

/// Parse a version string, ignoring a single leading non-digit tag marker.
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    let stripped = match trimmed.chars().next() {
        Some(first) if !first.is_ascii_digit() => &trimmed[first.len_utf8()..],
        _ => trimmed,
    };
    Version::parse(stripped).map_err(|err| DistCheckError::version(input, err))
}

/// Fetch `<dist_url>/index.json` and pick the best approved version newer
/// than `current`. Returns `None` when nothing qualifies.
pub async fn resolve(
    fetcher: &dyn DistFetcher,
    dist_url: &str,
    current: &Version,
    approve: &dyn ApproveVersion,
) -> Result<Option<DistEntry>> {
    let index_url = join_url(dist_url, INDEX_FILE);
    let body = fetcher.fetch_bytes(&index_url).await?;
    let entries: Vec<DistEntry> = serde_json::from_slice(&body)?;
    debug!(url = %index_url, entries = entries.len(), "fetched distribution index");

    let mut approved = Vec::new();
    for entry in entries {
        let approval = approve
            .approve_version(&entry)
            .await
            .map_err(DistCheckError::Approval)?;
        let version = match entry.parsed_version() {
            Ok(version) => version,
            Err(err) => {
                warn!("skipping index entry: {err}");
                continue;
            }
        };
        if approval && version.cmp_precedence(current) == Ordering::Greater {
            approved.push((version, entry));
        }
    }

    Ok(select_best(approved))
}

/// Pick the greatest version by semver precedence; build metadata is
/// ignored and the first of equal versions wins.
pub fn select_best(candidates: Vec<(Version, DistEntry)>) -> Option<DistEntry> {
    let mut best: Option<(Version, DistEntry)> = None;
    for (version, entry) in candidates {
        let replace = match &best {
            Some((best_version, _)) => {
                version.cmp_precedence(best_version) == Ordering::Greater
            }
            None => true,
        };
        if replace {
            best = Some((version, entry));
        }
    }
    best.map(|(_, entry)| entry)
}
