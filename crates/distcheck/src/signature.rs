//! Trust check for a release's checksum manifest.
//!
//! The cleartext manifest endpoint alone is not trusted. Its content is
//! accepted only once it is byte-for-byte identical to the signed manifest
//! as decrypted against the release's public key, imported into a keyring
//! that lives in the pipeline's working directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::{
    error::{DistCheckError, Result},
    fetcher::{join_url, DistFetcher},
    manifest::{parse_manifest, ManifestEntry, CLEARTEXT_MANIFEST, PUBLIC_KEY, SIGNED_MANIFEST},
    orchestrator::{FanOut, Pipeline},
    tools::SignatureTool,
};

const KEY_FILE: &str = "key.gpg";
const KEYRING_FILE: &str = "keyring";

enum KeyringPart {
    Imported,
    Cleartext(Bytes),
}

/// Verifies a version's checksum manifest against its detached signature.
pub struct SignatureVerifier {
    fetcher: Arc<dyn DistFetcher>,
    tool: Arc<dyn SignatureTool>,
}

impl SignatureVerifier {
    /// Create a verifier fetching through `fetcher` and decrypting with `tool`.
    pub fn new(fetcher: Arc<dyn DistFetcher>, tool: Arc<dyn SignatureTool>) -> Self {
        Self { fetcher, tool }
    }

    /// Fetch, decrypt and cross-check the manifest under `version_url`,
    /// returning its entries once trusted.
    pub async fn verify(
        &self,
        pipeline: &mut Pipeline,
        version_url: &str,
        work_dir: &Path,
    ) -> Result<Vec<ManifestEntry>> {
        let keyring = work_dir.join(KEYRING_FILE);

        let import = import_key(
            self.fetcher.clone(),
            self.tool.clone(),
            join_url(version_url, PUBLIC_KEY),
            work_dir.join(KEY_FILE),
            keyring.clone(),
        );
        let cleartext_url = join_url(version_url, CLEARTEXT_MANIFEST);
        let fetcher = self.fetcher.clone();
        let cleartext = async move {
            let body = fetcher.fetch_bytes(&cleartext_url).await?;
            Ok::<_, DistCheckError>(KeyringPart::Cleartext(body))
        };

        let mut joined = pipeline
            .fan_out(
                "import key and fetch cleartext manifest",
                FanOut::new()
                    .with("keyring", async move {
                        import.await?;
                        Ok::<_, DistCheckError>(KeyringPart::Imported)
                    })
                    .with("cleartext", cleartext),
            )
            .await?;
        let cleartext = match joined.take("cleartext")? {
            KeyringPart::Cleartext(body) => body,
            KeyringPart::Imported => {
                return Err(DistCheckError::Other("keyring fan-out mislabelled".into()))
            }
        };

        let signed_url = join_url(version_url, SIGNED_MANIFEST);
        let decrypted = pipeline
            .step("decrypt signed manifest", async {
                let signed = self.fetcher.fetch_stream(&signed_url).await?;
                self.tool.decrypt(&keyring, signed).await
            })
            .await?;

        if decrypted.as_slice() != cleartext.as_ref() {
            return Err(DistCheckError::SignatureMismatch);
        }
        info!(url = %signed_url, "checksum manifest signature verified");

        let entries = parse_manifest(&String::from_utf8_lossy(&decrypted))?;
        debug!(entries = entries.len(), "parsed checksum manifest");
        Ok(entries)
    }
}

async fn import_key(
    fetcher: Arc<dyn DistFetcher>,
    tool: Arc<dyn SignatureTool>,
    key_url: String,
    key_file: PathBuf,
    keyring: PathBuf,
) -> Result<()> {
    let key = fetcher.fetch_bytes(&key_url).await?;
    tokio::fs::write(&key_file, &key)
        .await
        .map_err(|err| DistCheckError::stream(format!("writing {}", key_file.display()), err))?;
    tool.import_key(&keyring, &key_file).await
}
