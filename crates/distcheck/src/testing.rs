//! In-memory stand-ins for the transport and the external tools.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::{
    error::{DistCheckError, ExitReason, Result},
    fetcher::{ByteStream, DistFetcher},
    tools::{ChecksumSession, ChecksumTool, SignatureTool},
};

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub(crate) struct MockFetcher {
    entries: HashMap<String, Vec<u8>>,
    requested: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert(&mut self, url: impl Into<String>, data: Vec<u8>) {
        self.entries.insert(url.into(), data);
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>> {
        self.requested.lock().unwrap().push(url.to_string());
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| DistCheckError::Other(format!("unknown url in mock fetcher: {url}")))
    }
}

#[async_trait]
impl DistFetcher for MockFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        self.lookup(url).map(Bytes::from)
    }

    async fn fetch_stream(&self, url: &str) -> Result<ByteStream> {
        let data = self.lookup(url)?;
        // Small chunks so every consumer sees more than one.
        let chunks: Vec<Result<Bytes>> = data
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Accepts a single key; "decrypts" by passing the signed bytes through
/// when the keyring holds that key, and fails like gpg otherwise.
pub(crate) struct MockSignatureTool {
    trusted_key: Vec<u8>,
    imported: Mutex<Vec<PathBuf>>,
}

impl MockSignatureTool {
    pub(crate) fn new(trusted_key: &[u8]) -> Self {
        Self {
            trusted_key: trusted_key.to_vec(),
            imported: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn imported_keyrings(&self) -> Vec<PathBuf> {
        self.imported.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignatureTool for MockSignatureTool {
    async fn import_key(&self, keyring: &Path, key_file: &Path) -> Result<()> {
        let key = tokio::fs::read(key_file)
            .await
            .map_err(|err| DistCheckError::stream("reading key file", err))?;
        tokio::fs::write(keyring, key)
            .await
            .map_err(|err| DistCheckError::stream("writing keyring", err))?;
        self.imported.lock().unwrap().push(keyring.to_path_buf());
        Ok(())
    }

    async fn decrypt(&self, keyring: &Path, signed: ByteStream) -> Result<Vec<u8>> {
        let key = tokio::fs::read(keyring).await.unwrap_or_default();
        let chunks: Vec<Bytes> = signed.try_collect().await?;
        if key != self.trusted_key {
            return Err(DistCheckError::ChildProcessFailure {
                name: "gpg".into(),
                reason: ExitReason::Code(2),
            });
        }
        Ok(chunks.concat())
    }
}

/// Computes a real SHA-256 in process, or reports a fixed digest.
pub(crate) struct MockChecksumTool {
    forced: Option<String>,
    fail_with: Option<ExitReason>,
}

impl MockChecksumTool {
    pub(crate) fn honest() -> Self {
        Self {
            forced: None,
            fail_with: None,
        }
    }

    pub(crate) fn reporting(digest: &str) -> Self {
        Self {
            forced: Some(digest.to_string()),
            fail_with: None,
        }
    }

    pub(crate) fn failing(reason: ExitReason) -> Self {
        Self {
            forced: None,
            fail_with: Some(reason),
        }
    }
}

impl ChecksumTool for MockChecksumTool {
    fn start(&self) -> Result<ChecksumSession> {
        let (writer, mut reader) = tokio::io::duplex(16 * 1024);
        let forced = self.forced.clone();
        let fail_with = self.fail_with;

        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let output = async move {
            let mut data = Vec::new();
            reader
                .read_to_end(&mut data)
                .await
                .map_err(|err| DistCheckError::stream("reading mock checksum input", err))?;
            let _ = done_tx.send(());
            let digest = forced.unwrap_or_else(|| sha256_hex(&data));
            Ok::<_, DistCheckError>(format!("{digest}  -\n"))
        }
        .boxed();

        let exit = async move {
            let _ = done_rx.await;
            match fail_with {
                Some(reason) => Err(DistCheckError::ChildProcessFailure {
                    name: "shasum".into(),
                    reason,
                }),
                None => Ok(()),
            }
        }
        .boxed();

        Ok(ChecksumSession {
            input: Box::new(writer),
            exit,
            output,
        })
    }
}
