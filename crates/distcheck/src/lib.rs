//! Signed release checks against a Node/io.js style distribution.
//!
//! A check resolves the newest approved version listed in the
//! distribution's `index.json`, proves that the release's `SHASUMS256.txt`
//! matches its gpg-signed `SHASUMS256.txt.asc`, and then streams every
//! approved artefact to disk while an external `shasum` process hashes it.
//! Downloads whose digest disagrees with the signed manifest are rejected.
//! The working directory holding the keyring and the download is removed
//! before the outcome is reported, whether the check succeeded or not.
//!
//! ```ignore
//! use distcheck::{ApproveFn, CheckConfig, DistChecker};
//!
//! # async fn demo() -> distcheck::Result<()> {
//! let checker = DistChecker::from_env()?;
//! let config = CheckConfig::new(
//!     env!("CARGO_PKG_VERSION"),
//!     "https://iojs.org/dist",
//!     ApproveFn(|path: &str| path.ends_with("darwin-x64.tar.gz")),
//! );
//!
//! let download = checker.check(&config).await?;
//! println!("{} verified as {}", download.source_url, download.checksum);
//! # Ok(())
//! # }
//! ```

mod approval;
mod checker;
mod cleanup;
mod download;
mod error;
mod fetcher;
mod manifest;
pub mod orchestrator;
mod resolver;
mod signature;
mod tools;

#[cfg(test)]
mod testing;

pub use approval::{AlwaysApprove, ApproveFilename, ApproveFn, ApproveVersion};
pub use checker::{check, CheckConfig, DistChecker};
pub use cleanup::CleanupTracker;
pub use download::{approved_entries, FetchPolicy, FileFetcher, VerifiedDownload, RESOURCE_FILE};
pub use error::{DistCheckError, ExitReason, Result};
pub use fetcher::{join_url, ByteStream, DistFetcher, HttpDistClient, HttpDistClientBuilder};
pub use manifest::{
    parse_manifest, ManifestEntry, CLEARTEXT_MANIFEST, PUBLIC_KEY, SIGNED_MANIFEST,
};
pub use resolver::{parse_version, resolve, select_best, DistEntry, INDEX_FILE};
pub use signature::SignatureVerifier;
pub use tools::{
    check_exit, pipe_stream, ChecksumSession, ChecksumTool, GpgTool, ShasumTool, SignatureTool,
    ToolConfig,
};
