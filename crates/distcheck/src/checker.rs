use std::path::PathBuf;
use std::sync::Arc;

use semver::Version;
use tempfile::TempDir;
use tracing::info;

use crate::{
    approval::{AlwaysApprove, ApproveFilename, ApproveVersion},
    cleanup::CleanupTracker,
    download::{FetchPolicy, FileFetcher, VerifiedDownload},
    error::{DistCheckError, Result},
    fetcher::{join_url, DistFetcher, HttpDistClient},
    orchestrator::{FanOut, Pipeline},
    resolver::{parse_version, resolve, DistEntry},
    signature::SignatureVerifier,
    tools::{ChecksumTool, GpgTool, ShasumTool, SignatureTool, ToolConfig},
};

/// Inputs of one [`DistChecker::check`] invocation.
#[derive(Clone)]
pub struct CheckConfig {
    /// Version currently installed; only strictly newer releases qualify.
    pub current_version: String,
    /// Base URL of the distribution, holding `index.json`.
    pub dist_url: String,
    /// Selects which manifest files may be downloaded.
    pub approve_filename: Arc<dyn ApproveFilename>,
    /// Selects which releases may be chosen. Defaults to [`AlwaysApprove`].
    pub approve_version: Arc<dyn ApproveVersion>,
    /// Defaults to [`FetchPolicy::FirstApproved`].
    pub fetch_policy: FetchPolicy,
}

impl CheckConfig {
    /// Create a config approving every version and fetching the first
    /// approved file.
    pub fn new(
        current_version: impl Into<String>,
        dist_url: impl Into<String>,
        approve_filename: impl ApproveFilename + 'static,
    ) -> Self {
        Self {
            current_version: current_version.into(),
            dist_url: dist_url.into(),
            approve_filename: Arc::new(approve_filename),
            approve_version: Arc::new(AlwaysApprove),
            fetch_policy: FetchPolicy::default(),
        }
    }

    /// Replace the version predicate.
    pub fn with_approve_version(mut self, approve: impl ApproveVersion + 'static) -> Self {
        self.approve_version = Arc::new(approve);
        self
    }

    /// Set which approved files get downloaded.
    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }
}

enum Startup {
    WorkDir(TempDir),
    BestVersion(Option<DistEntry>),
}

/// Runs the resolve, verify and fetch pipeline against a distribution.
pub struct DistChecker {
    fetcher: Arc<dyn DistFetcher>,
    signature: Arc<dyn SignatureTool>,
    checksum: Arc<dyn ChecksumTool>,
}

impl DistChecker {
    /// Create a checker from explicit collaborators.
    pub fn new(
        fetcher: Arc<dyn DistFetcher>,
        signature: Arc<dyn SignatureTool>,
        checksum: Arc<dyn ChecksumTool>,
    ) -> Self {
        Self {
            fetcher,
            signature,
            checksum,
        }
    }

    /// Use the gpg and shasum executables named in `tools`.
    pub fn with_tools(fetcher: Arc<dyn DistFetcher>, tools: &ToolConfig) -> Self {
        Self::new(
            fetcher,
            Arc::new(GpgTool::new(tools)),
            Arc::new(ShasumTool::new(tools)),
        )
    }

    /// HTTP transport plus tools configured from the environment.
    pub fn from_env() -> Result<Self> {
        let client = HttpDistClient::builder().build()?;
        Ok(Self::with_tools(Arc::new(client), &ToolConfig::from_env()))
    }

    /// Check for a newer approved release and return the last verified download.
    pub async fn check(&self, config: &CheckConfig) -> Result<VerifiedDownload> {
        self.check_all(config)
            .await?
            .pop()
            .ok_or(DistCheckError::NoApprovedFile)
    }

    /// Callback form of [`check`](Self::check). `callback` runs exactly
    /// once, after every temporary resource has been released.
    pub async fn check_with<F>(&self, config: &CheckConfig, callback: F)
    where
        F: FnOnce(Result<VerifiedDownload>),
    {
        callback(self.check(config).await)
    }

    /// Check for a newer approved release and return every verified
    /// download selected by the configured [`FetchPolicy`].
    pub async fn check_all(&self, config: &CheckConfig) -> Result<Vec<VerifiedDownload>> {
        let current = parse_version(&config.current_version)?;
        let mut cleanup = CleanupTracker::new();
        let outcome = self.run(&mut cleanup, config, current).await;
        cleanup.conclude()?;
        outcome
    }

    async fn run(
        &self,
        cleanup: &mut CleanupTracker,
        config: &CheckConfig,
        current: Version,
    ) -> Result<Vec<VerifiedDownload>> {
        let mut pipeline = Pipeline::new("check");

        let fetcher = self.fetcher.clone();
        let dist_url = config.dist_url.clone();
        let approve_version = config.approve_version.clone();
        let mut joined = pipeline
            .fan_out(
                "provision working directory and resolve version",
                FanOut::new()
                    .with("work_dir", async {
                        let dir = tokio::task::spawn_blocking(|| {
                            tempfile::Builder::new().prefix("distcheck-").tempdir()
                        })
                        .await?
                        .map_err(DistCheckError::WorkingDirectory)?;
                        Ok::<_, DistCheckError>(Startup::WorkDir(dir))
                    })
                    .with("best_version", async move {
                        let best = resolve(
                            fetcher.as_ref(),
                            &dist_url,
                            &current,
                            approve_version.as_ref(),
                        )
                        .await?;
                        Ok::<_, DistCheckError>(Startup::BestVersion(best))
                    }),
            )
            .await?;

        let work_dir = match joined.take("work_dir")? {
            Startup::WorkDir(dir) => register_work_dir(cleanup, dir),
            Startup::BestVersion(_) => {
                return Err(DistCheckError::Other("startup fan-out mislabelled".into()))
            }
        };
        let best = match joined.take("best_version")? {
            Startup::BestVersion(best) => best.ok_or(DistCheckError::NoApprovedVersion)?,
            Startup::WorkDir(_) => {
                return Err(DistCheckError::Other("startup fan-out mislabelled".into()))
            }
        };

        let version_url = join_url(&config.dist_url, &best.version);
        info!(version = %best.version, url = %version_url, "selected release");

        let entries = SignatureVerifier::new(self.fetcher.clone(), self.signature.clone())
            .verify(&mut pipeline, &version_url, &work_dir)
            .await?;

        FileFetcher::new(self.fetcher.clone(), self.checksum.clone())
            .fetch_approved(
                &mut pipeline,
                entries,
                config.approve_filename.as_ref(),
                &version_url,
                &work_dir,
                config.fetch_policy,
            )
            .await
    }
}

/// Hand the directory's removal over to `cleanup` and return its path.
fn register_work_dir(cleanup: &mut CleanupTracker, dir: TempDir) -> PathBuf {
    let path = dir.keep();
    cleanup.register_dir_removal(path.clone());
    path
}

/// [`DistChecker::check`] with the HTTP transport and environment-configured tools.
pub async fn check(config: &CheckConfig) -> Result<VerifiedDownload> {
    DistChecker::from_env()?.check(config).await
}
