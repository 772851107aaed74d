use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use distcheck::{
    parse_version, ApproveFn, CheckConfig, DistChecker, DistEntry, FetchPolicy, VerifiedDownload,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for a one-shot release check
#[derive(Parser, Debug)]
#[clap(version, about = "Check a distribution for a newer signed release")]
struct Args {
    /// Version currently installed
    #[clap(long)]
    current_version: String,

    /// Base URL of the distribution, holding index.json
    #[clap(long, default_value = "https://iojs.org/dist")]
    dist_url: String,

    /// Glob a manifest filepath must match to be downloaded (repeatable)
    #[clap(long = "file", value_name = "GLOB", required = true)]
    files: Vec<String>,

    /// Skip pre-release versions
    #[clap(long)]
    stable_only: bool,

    /// Download every approved file instead of the first
    #[clap(long)]
    all: bool,

    /// Directory to copy verified files into
    #[clap(long, value_name = "DIR")]
    output: Option<PathBuf>,
}

fn file_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob {pattern}"))?);
    }
    Ok(builder.build()?)
}

fn is_stable(entry: &DistEntry) -> bool {
    match parse_version(&entry.version) {
        Ok(version) => version.pre.is_empty(),
        Err(_) => false,
    }
}

fn file_name(download: &VerifiedDownload) -> &str {
    download
        .source_url
        .rsplit('/')
        .next()
        .unwrap_or(download.source_url.as_str())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,distcheck=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let globs = file_globs(&args.files)?;
    let mut config = CheckConfig::new(
        args.current_version,
        args.dist_url,
        ApproveFn(move |path: &str| globs.is_match(path)),
    );
    if args.stable_only {
        config = config.with_approve_version(ApproveFn(is_stable));
    }
    if args.all {
        config = config.with_fetch_policy(FetchPolicy::AllApproved);
    }

    let checker = DistChecker::from_env()?;
    let downloads = checker.check_all(&config).await?;

    for download in downloads {
        info!(url = %download.source_url, checksum = %download.checksum, "verified");
        match &args.output {
            Some(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
                let destination = dir.join(file_name(&download));
                let bytes = download.persist_to(&destination).await?;
                info!(path = %destination.display(), bytes, "saved");
            }
            None => warn!(
                url = %download.source_url,
                "no --output directory given; verified file discarded"
            ),
        }
    }

    Ok(())
}
