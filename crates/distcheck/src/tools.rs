//! External subprocess collaborators: the OpenPGP tool used for key import
//! and manifest decryption, and the checksum tool fed with downloaded bytes.
//!
//! Both sit behind traits so the pipeline can be driven without the real
//! executables.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::{
    error::{DistCheckError, ExitReason, Result},
    fetcher::ByteStream,
    orchestrator::{FanOut, StageFuture},
};

/// Program paths and fixed arguments of the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// OpenPGP executable.
    pub gpg: PathBuf,
    /// Arguments placed before the keyring selection on every gpg call.
    pub gpg_args: Vec<String>,
    /// Checksum executable.
    pub shasum: PathBuf,
    /// Algorithm selector and stdin marker passed to the checksum tool.
    pub shasum_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            gpg: PathBuf::from("gpg"),
            gpg_args: vec!["--batch".into(), "--no-default-keyring".into()],
            shasum: PathBuf::from("shasum"),
            shasum_args: vec!["-a".into(), "256".into(), "-".into()],
        }
    }
}

impl ToolConfig {
    /// Defaults overlaid with `DISTCHECK_GPG` and `DISTCHECK_SHASUM`.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Overlay non-empty program paths returned by `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(gpg) = lookup("DISTCHECK_GPG") {
            if !gpg.is_empty() {
                self.gpg = PathBuf::from(gpg);
            }
        }

        if let Some(shasum) = lookup("DISTCHECK_SHASUM") {
            if !shasum.is_empty() {
                self.shasum = PathBuf::from(shasum);
            }
        }

        self
    }
}

/// Keyring import and signed-manifest decryption.
#[async_trait]
pub trait SignatureTool: Send + Sync {
    /// Import the key at `key_file` into the keyring file at `keyring`.
    async fn import_key(&self, keyring: &Path, key_file: &Path) -> Result<()>;

    /// Decrypt `signed` against `keyring` and return the plaintext bytes.
    async fn decrypt(&self, keyring: &Path, signed: ByteStream) -> Result<Vec<u8>>;
}

/// A running checksum computation.
///
/// Bytes written to `input` are hashed; closing `input` ends the data.
/// `exit` resolves when the computation finished cleanly and `output` to
/// the text it reported, `<hex><whitespace>-`.
pub struct ChecksumSession {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub exit: StageFuture<()>,
    pub output: StageFuture<String>,
}

/// Starts checksum computations over streamed bytes.
pub trait ChecksumTool: Send + Sync {
    fn start(&self) -> Result<ChecksumSession>;
}

/// [`SignatureTool`] backed by the gpg executable.
#[derive(Debug, Clone)]
pub struct GpgTool {
    program: PathBuf,
    args: Vec<String>,
}

impl GpgTool {
    /// Create a tool running the configured gpg program.
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            program: config.gpg.clone(),
            args: config.gpg_args.clone(),
        }
    }

    fn command(&self, keyring: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg("--keyring").arg(keyring);
        command
    }
}

enum DecryptPart {
    Fed,
    Exited,
    Plaintext(Vec<u8>),
}

#[async_trait]
impl SignatureTool for GpgTool {
    async fn import_key(&self, keyring: &Path, key_file: &Path) -> Result<()> {
        let name = program_name(&self.program);
        let status = self
            .command(keyring)
            .arg("--import")
            .arg(key_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| DistCheckError::Spawn {
                name: name.clone(),
                source,
            })?;
        check_exit(&name, status)?;
        debug!(keyring = %keyring.display(), "imported public key");
        Ok(())
    }

    async fn decrypt(&self, keyring: &Path, signed: ByteStream) -> Result<Vec<u8>> {
        let name = program_name(&self.program);
        let mut child = self
            .command(keyring)
            .arg("--decrypt")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DistCheckError::Spawn {
                name: name.clone(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DistCheckError::Other(format!("{name} stdin unavailable")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DistCheckError::Other(format!("{name} stdout unavailable")))?;

        // A tool that exits early closes its stdin; its exit status is the
        // error worth reporting, not the broken pipe.
        let exit_name = name.clone();
        let mut joined = FanOut::new()
            .with("feed", async move {
                match pipe_stream(signed, stdin, "piping signed manifest").await {
                    Ok(_) => Ok(DecryptPart::Fed),
                    Err(DistCheckError::Stream { source, .. })
                        if source.kind() == std::io::ErrorKind::BrokenPipe =>
                    {
                        Ok(DecryptPart::Fed)
                    }
                    Err(err) => Err(err),
                }
            })
            .with("exit", async move {
                let status = child
                    .wait()
                    .await
                    .map_err(|err| DistCheckError::stream(format!("waiting for {exit_name}"), err))?;
                check_exit(&exit_name, status)?;
                Ok::<_, DistCheckError>(DecryptPart::Exited)
            })
            .with("plaintext", async move {
                let mut body = Vec::new();
                stdout
                    .read_to_end(&mut body)
                    .await
                    .map_err(|err| DistCheckError::stream("reading decrypted manifest", err))?;
                Ok::<_, DistCheckError>(DecryptPart::Plaintext(body))
            })
            .join()
            .await?;

        match joined.take("plaintext")? {
            DecryptPart::Plaintext(body) => Ok(body),
            DecryptPart::Fed | DecryptPart::Exited => {
                Err(DistCheckError::Other("decrypt fan-out mislabelled".into()))
            }
        }
    }
}

/// [`ChecksumTool`] backed by an external checksum executable.
#[derive(Debug, Clone)]
pub struct ShasumTool {
    program: PathBuf,
    args: Vec<String>,
}

impl ShasumTool {
    /// Create a tool running the configured checksum program.
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            program: config.shasum.clone(),
            args: config.shasum_args.clone(),
        }
    }
}

impl ChecksumTool for ShasumTool {
    fn start(&self) -> Result<ChecksumSession> {
        let name = program_name(&self.program);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DistCheckError::Spawn {
                name: name.clone(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DistCheckError::Other(format!("{name} stdin unavailable")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DistCheckError::Other(format!("{name} stdout unavailable")))?;

        let exit = async move {
            let status = child
                .wait()
                .await
                .map_err(|err| DistCheckError::stream(format!("waiting for {name}"), err))?;
            check_exit(&name, status)
        }
        .boxed();

        let output = async move {
            let mut body = String::new();
            stdout
                .read_to_string(&mut body)
                .await
                .map_err(|err| DistCheckError::stream("reading checksum output", err))?;
            Ok::<_, DistCheckError>(body)
        }
        .boxed();

        Ok(ChecksumSession {
            input: Box::new(stdin),
            exit,
            output,
        })
    }
}

/// Copy every chunk of `stream` into `writer`, then shut the writer down.
pub async fn pipe_stream<W>(mut stream: ByteStream, mut writer: W, context: &str) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|err| DistCheckError::stream(context, err))?;
        written += chunk.len() as u64;
    }
    writer
        .shutdown()
        .await
        .map_err(|err| DistCheckError::stream(context, err))?;
    Ok(written)
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Map a non-success exit status to [`DistCheckError::ChildProcessFailure`].
pub fn check_exit(name: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        debug!(name, "subprocess exited cleanly");
        return Ok(());
    }
    Err(DistCheckError::ChildProcessFailure {
        name: name.to_string(),
        reason: exit_reason(status),
    })
}

fn exit_reason(status: ExitStatus) -> ExitReason {
    if let Some(code) = status.code() {
        return ExitReason::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitReason::Signal(signal);
        }
    }
    ExitReason::Unknown
}
