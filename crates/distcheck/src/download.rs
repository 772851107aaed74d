use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::{
    approval::ApproveFilename,
    error::{DistCheckError, Result},
    fetcher::{join_url, ByteStream, DistFetcher},
    manifest::ManifestEntry,
    orchestrator::{FanOut, Pipeline},
    tools::{ChecksumSession, ChecksumTool},
};

/// Name of the file every download is staged in, inside the working directory.
pub const RESOURCE_FILE: &str = "resource";

/// Which approved manifest entries get downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Only the first approved entry, in manifest order.
    #[default]
    FirstApproved,
    /// Every approved entry, in manifest order.
    AllApproved,
}

/// A downloaded file whose checksum matched the verified manifest.
#[derive(Debug)]
pub struct VerifiedDownload {
    /// URL the bytes were streamed from.
    pub source_url: String,
    /// Read handle on the verified bytes, positioned at the start.
    pub stream: File,
    /// Checksum from the manifest, confirmed by the checksum tool.
    pub checksum: String,
}

impl VerifiedDownload {
    /// Copy the verified bytes to `destination`, returning the byte count.
    pub async fn persist_to(mut self, destination: &Path) -> Result<u64> {
        let context = || format!("copying verified file to {}", destination.display());
        let mut target = File::create(destination)
            .await
            .map_err(|err| DistCheckError::stream(context(), err))?;
        let copied = tokio::io::copy(&mut self.stream, &mut target)
            .await
            .map_err(|err| DistCheckError::stream(context(), err))?;
        target
            .flush()
            .await
            .map_err(|err| DistCheckError::stream(context(), err))?;
        Ok(copied)
    }
}

enum TransferPart {
    Written(u64),
    Exited,
    Report(String),
}

/// Keep the manifest entries `approve` accepts, in order.
pub async fn approved_entries(
    entries: Vec<ManifestEntry>,
    approve: &dyn ApproveFilename,
) -> Result<Vec<ManifestEntry>> {
    let mut approved = Vec::new();
    for entry in entries {
        if approve
            .approve_filename(&entry.filepath)
            .await
            .map_err(DistCheckError::Approval)?
        {
            approved.push(entry);
        }
    }
    Ok(approved)
}

/// Streams approved files to disk while an external tool checksums them.
pub struct FileFetcher {
    fetcher: Arc<dyn DistFetcher>,
    checksum: Arc<dyn ChecksumTool>,
}

impl FileFetcher {
    /// Create a fetcher streaming through `fetcher` and hashing with `checksum`.
    pub fn new(fetcher: Arc<dyn DistFetcher>, checksum: Arc<dyn ChecksumTool>) -> Self {
        Self { fetcher, checksum }
    }

    /// Download and verify the approved entries selected by `policy`.
    ///
    /// Fails with [`DistCheckError::NoApprovedFile`] when `approve` accepts
    /// nothing. Downloads run one after another through the same resource
    /// path under `work_dir`.
    pub async fn fetch_approved(
        &self,
        pipeline: &mut Pipeline,
        entries: Vec<ManifestEntry>,
        approve: &dyn ApproveFilename,
        version_url: &str,
        work_dir: &Path,
        policy: FetchPolicy,
    ) -> Result<Vec<VerifiedDownload>> {
        let approved = pipeline
            .step("approve files", approved_entries(entries, approve))
            .await?;
        if approved.is_empty() {
            return Err(DistCheckError::NoApprovedFile);
        }

        let selected = match policy {
            FetchPolicy::FirstApproved => {
                if approved.len() > 1 {
                    debug!(
                        skipped = approved.len() - 1,
                        "fetching only the first approved file"
                    );
                }
                &approved[..1]
            }
            FetchPolicy::AllApproved => &approved[..],
        };

        let resource = work_dir.join(RESOURCE_FILE);
        let mut downloads = Vec::with_capacity(selected.len());
        for entry in selected {
            let download = self
                .fetch_one(pipeline, entry, version_url, &resource)
                .await?;
            downloads.push(download);
        }
        Ok(downloads)
    }

    async fn fetch_one(
        &self,
        pipeline: &mut Pipeline,
        entry: &ManifestEntry,
        version_url: &str,
        resource: &Path,
    ) -> Result<VerifiedDownload> {
        let url = join_url(version_url, &entry.filepath);

        let file = pipeline
            .step("open resource file", open_fresh(resource))
            .await?;
        let ChecksumSession {
            input,
            exit,
            output,
        } = self.checksum.start()?;
        let body = self.fetcher.fetch_stream(&url).await?;

        let mut joined = pipeline
            .fan_out(
                "stream and checksum",
                FanOut::new()
                    .with("download", async move {
                        tee_stream(body, file, input).await.map(TransferPart::Written)
                    })
                    .with("checksum_code", async move {
                        exit.await.map(|()| TransferPart::Exited)
                    })
                    .with("checksum_body", async move {
                        output.await.map(TransferPart::Report)
                    }),
            )
            .await?;

        let written = match joined.take("download")? {
            TransferPart::Written(bytes) => bytes,
            _ => return Err(DistCheckError::Other("transfer fan-out mislabelled".into())),
        };
        let report = match joined.take("checksum_body")? {
            TransferPart::Report(report) => report,
            _ => return Err(DistCheckError::Other("transfer fan-out mislabelled".into())),
        };

        let actual = report.split_whitespace().next().unwrap_or_default();
        if !entry.matches(actual) {
            return Err(DistCheckError::ChecksumMismatch {
                url,
                expected: entry.checksum.clone(),
                actual: actual.to_string(),
            });
        }

        let stream = pipeline
            .step("reopen verified file", async {
                File::open(resource).await.map_err(|err| {
                    DistCheckError::stream(format!("reopening {}", resource.display()), err)
                })
            })
            .await?;
        info!(url = %url, bytes = written, "verified download");

        Ok(VerifiedDownload {
            source_url: url,
            stream,
            checksum: entry.checksum.clone(),
        })
    }
}

/// Create `path` as a new, empty file.
///
/// An existing file is unlinked first, so read handles already given out for
/// an earlier download keep their own bytes.
async fn open_fresh(path: &Path) -> Result<File> {
    let context = || format!("opening {}", path.display());
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(DistCheckError::stream(context(), err)),
    }
    File::create(path)
        .await
        .map_err(|err| DistCheckError::stream(context(), err))
}

/// Write every chunk of `body` to both `file` and `checksum_input`.
///
/// A checksum tool that stops reading is left to report its own failure
/// through its exit status; the file still receives every byte.
async fn tee_stream<W>(mut body: ByteStream, mut file: File, mut checksum_input: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    let mut checksum_open = true;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|err| DistCheckError::stream("writing resource file", err))?;
        if checksum_open {
            match checksum_input.write_all(&chunk).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("checksum tool closed its input early");
                    checksum_open = false;
                }
                Err(err) => return Err(DistCheckError::stream("piping into checksum tool", err)),
            }
        }
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|err| DistCheckError::stream("flushing resource file", err))?;
    if checksum_open {
        checksum_input
            .shutdown()
            .await
            .map_err(|err| DistCheckError::stream("closing checksum input", err))?;
    }
    Ok(written)
}
