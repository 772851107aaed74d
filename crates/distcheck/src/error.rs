use std::fmt;

/// Convenient result alias for release-check operations.
pub type Result<T> = std::result::Result<T, DistCheckError>;

/// How an external subprocess ended when it did not exit cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited with a non-zero status code.
    Code(i32),
    /// The process was terminated by a signal.
    Signal(i32),
    /// The platform reported neither a code nor a signal.
    Unknown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Code(code) => write!(f, "code: {code}"),
            ExitReason::Signal(signal) => write!(f, "signal: {signal}"),
            ExitReason::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Errors that can occur while checking for and fetching a release.
#[derive(thiserror::Error, Debug)]
pub enum DistCheckError {
    /// No entry of the distribution index is both approved and newer.
    #[error("no approved version newer than the current one")]
    NoApprovedVersion,
    /// The decrypted signed manifest differs from the cleartext copy.
    #[error("signature decryption did not match cleartext")]
    SignatureMismatch,
    /// The filename predicate rejected every manifest entry.
    #[error("no file was approved to download")]
    NoApprovedFile,
    /// The downloaded bytes hashed to something other than the manifest entry.
    #[error("checksum mismatch on {url} (expected {expected}, got {actual})")]
    ChecksumMismatch {
        /// URL the artefact was streamed from.
        url: String,
        /// Checksum listed in the verified manifest.
        expected: String,
        /// Checksum reported by the checksum tool.
        actual: String,
    },
    /// An external tool exited unsuccessfully.
    #[error("{name} failed with {reason}")]
    ChildProcessFailure {
        /// Name of the subprocess, e.g. `gpg` or `shasum`.
        name: String,
        /// Exit code or terminating signal.
        reason: ExitReason,
    },
    /// An external tool could not be started at all.
    #[error("failed to start {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// Opening, writing or piping a byte stream failed.
    #[error("stream error while {context}: {source}")]
    Stream {
        /// What the pipeline was doing with the stream.
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// The ephemeral working directory could not be provisioned.
    #[error("working directory error: {0}")]
    WorkingDirectory(#[source] std::io::Error),
    /// Network request failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    /// The distribution index could not be decoded from JSON.
    #[error("distribution index decoding failed: {0}")]
    IndexDecode(#[from] serde_json::Error),
    /// A version string could not be parsed.
    #[error("invalid version {input:?}: {source}")]
    Version {
        input: String,
        #[source]
        source: semver::Error,
    },
    /// A non-blank manifest line lacked a checksum or a filepath.
    #[error("malformed manifest line: {line:?}")]
    MalformedManifest { line: String },
    /// A caller-supplied approval predicate failed.
    #[error("approval predicate failed: {0}")]
    Approval(#[source] anyhow::Error),
    /// `conclude()` was called on a cleanup tracker that already concluded.
    #[error("cleanup tracker already concluded")]
    CleanupConcluded,
    /// A blocking task panicked or was cancelled.
    #[error("task join error: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl DistCheckError {
    /// Helper for wrapping stream I/O failures with what was being done.
    pub fn stream(context: impl Into<String>, source: std::io::Error) -> Self {
        DistCheckError::Stream {
            context: context.into(),
            source,
        }
    }

    /// Helper for wrapping version parse failures.
    pub fn version(input: impl Into<String>, source: semver::Error) -> Self {
        DistCheckError::Version {
            input: input.into(),
            source,
        }
    }
}
