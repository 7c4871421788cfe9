//! Model provisioning: resumable chunked download with hash verification.
//!
//! Rounds have bounded CPU/time budgets, so at most ONE ranged chunk is
//! fetched per call; the host tolerates multi-round preparation. Network
//! failures leave the partial file intact (transient), a hash mismatch
//! deletes the artifact (fatal for that download attempt).

use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::types::{Result, SagaError};

/// The expected model artifact.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub source_url: String,
    pub chunk_size: u64,
}

/// Outcome of one provisioning round.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionStatus {
    /// Fully present and hash-verified.
    Complete { path: PathBuf },
    /// Still downloading; `progress` is a percentage.
    Partial { progress: f64 },
    /// The artifact was bad and has been removed.
    Failed { reason: String },
}

pub struct ModelProvisioner {
    dir: PathBuf,
    spec: ModelSpec,
}

impl ModelProvisioner {
    pub fn new(dir: impl Into<PathBuf>, spec: ModelSpec) -> Self {
        Self {
            dir: dir.into(),
            spec,
        }
    }

    /// Full path of the model blob.
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.spec.name)
    }

    /// Sentinel recording a successful hash verification, so later rounds
    /// skip re-hashing a multi-gigabyte file.
    fn sentinel_path(&self) -> PathBuf {
        self.dir.join(format!("{}.verified", self.spec.name))
    }

    fn current_len(&self) -> u64 {
        std::fs::metadata(self.model_path())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Download progress as a percentage.
    pub fn progress(&self) -> f64 {
        if self.spec.size_bytes == 0 {
            return 0.0;
        }
        (self.current_len() as f64 / self.spec.size_bytes as f64) * 100.0
    }

    /// Ensure the model is present and verified, doing at most one chunk of
    /// network work. Called at the start of each non-readonly round.
    pub async fn ensure_available(&self) -> ProvisionStatus {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            return ProvisionStatus::Failed {
                reason: format!("cannot create model dir: {e}"),
            };
        }

        let path = self.model_path();
        let len = self.current_len();

        if len == self.spec.size_bytes {
            return self.verify_complete(&path);
        }

        if len > self.spec.size_bytes {
            warn!(
                have = len,
                expected = self.spec.size_bytes,
                "model file larger than expected, discarding"
            );
            let _ = std::fs::remove_file(&path);
            let _ = std::fs::remove_file(self.sentinel_path());
            return ProvisionStatus::Failed {
                reason: "oversized model file discarded".to_string(),
            };
        }

        info!(
            have = len,
            expected = self.spec.size_bytes,
            progress = self.progress(),
            "downloading next model chunk"
        );

        match self.download_chunk(len).await {
            Ok(written) => {
                info!(written, progress = self.progress(), "chunk appended");
                if self.current_len() >= self.spec.size_bytes {
                    self.verify_complete(&path)
                } else {
                    ProvisionStatus::Partial {
                        progress: self.progress(),
                    }
                }
            }
            Err(e) => {
                // Transient: keep the partial file, retry next round.
                warn!(error = %e, "chunk download failed, will retry next round");
                ProvisionStatus::Partial {
                    progress: self.progress(),
                }
            }
        }
    }

    fn verify_complete(&self, path: &Path) -> ProvisionStatus {
        if self.sentinel_path().exists() {
            return ProvisionStatus::Complete {
                path: path.to_path_buf(),
            };
        }

        info!("verifying model checksum");
        match verify_checksum(path, &self.spec.sha256) {
            Ok(true) => {
                if let Err(e) = std::fs::write(self.sentinel_path(), &self.spec.sha256) {
                    warn!(error = %e, "could not write verification sentinel");
                }
                info!("model checksum verified");
                ProvisionStatus::Complete {
                    path: path.to_path_buf(),
                }
            }
            Ok(false) => {
                warn!("model checksum mismatch, deleting artifact");
                let _ = std::fs::remove_file(path);
                let _ = std::fs::remove_file(self.sentinel_path());
                ProvisionStatus::Failed {
                    reason: "checksum mismatch, artifact deleted".to_string(),
                }
            }
            Err(e) => ProvisionStatus::Failed {
                reason: format!("checksum verification failed: {e}"),
            },
        }
    }

    /// Fetch one `Range` chunk and append it to the partial file.
    async fn download_chunk(&self, start: u64) -> Result<u64> {
        let end = (start + self.spec.chunk_size).min(self.spec.size_bytes) - 1;

        let response = reqwest::Client::new()
            .get(&self.spec.source_url)
            .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
            .header(reqwest::header::USER_AGENT, "saga-contract/1.0")
            .send()
            .await
            .map_err(|e| SagaError::Network(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::PARTIAL_CONTENT && !status.is_success() {
            return Err(SagaError::Network(format!("HTTP {status}")));
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.model_path())?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SagaError::Network(e.to_string()))?;
            file.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        file.flush()?;

        Ok(written)
    }
}

/// SHA-256 a file and compare against a lowercase hex digest.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    Ok(actual == expected.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec_for(content: &[u8]) -> ModelSpec {
        let mut hasher = Sha256::new();
        hasher.update(content);
        ModelSpec {
            name: "tiny.gguf".to_string(),
            size_bytes: content.len() as u64,
            sha256: hex::encode(hasher.finalize()),
            source_url: "http://127.0.0.1:9/unreachable".to_string(),
            chunk_size: 4,
        }
    }

    #[test]
    fn checksum_verification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello world").unwrap();

        // SHA-256 of "hello world"
        let expected = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        assert!(verify_checksum(&path, expected).unwrap());
        assert!(verify_checksum(&path, &expected.to_uppercase()).unwrap());
        assert!(!verify_checksum(&path, "0000").unwrap());
    }

    #[tokio::test]
    async fn complete_file_verifies_and_writes_sentinel() {
        let dir = TempDir::new().unwrap();
        let content = b"model-bytes";
        let spec = spec_for(content);
        let provisioner = ModelProvisioner::new(dir.path(), spec);
        std::fs::write(provisioner.model_path(), content).unwrap();

        match provisioner.ensure_available().await {
            ProvisionStatus::Complete { path } => assert_eq!(path, provisioner.model_path()),
            other => panic!("expected Complete, got {:?}", other),
        }
        assert!(provisioner.sentinel_path().exists());
    }

    #[tokio::test]
    async fn sentinel_skips_rehash() {
        let dir = TempDir::new().unwrap();
        let content = b"model-bytes";
        let spec = spec_for(content);
        let provisioner = ModelProvisioner::new(dir.path(), spec);

        // Same length, different content: only the sentinel makes this pass.
        std::fs::write(provisioner.model_path(), b"xxxxx-bytes").unwrap();
        std::fs::write(provisioner.sentinel_path(), "trusted").unwrap();

        assert!(matches!(
            provisioner.ensure_available().await,
            ProvisionStatus::Complete { .. }
        ));
    }

    #[tokio::test]
    async fn hash_mismatch_deletes_artifact() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec_for(b"model-bytes");
        spec.sha256 = "0".repeat(64);
        let provisioner = ModelProvisioner::new(dir.path(), spec);
        std::fs::write(provisioner.model_path(), b"model-bytes").unwrap();

        match provisioner.ensure_available().await {
            ProvisionStatus::Failed { reason } => assert!(reason.contains("checksum")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(!provisioner.model_path().exists());
    }

    #[tokio::test]
    async fn network_failure_is_partial_and_keeps_file(){
        let dir = TempDir::new().unwrap();
        let spec = spec_for(b"model-bytes");
        let provisioner = ModelProvisioner::new(dir.path(), spec);
        std::fs::write(provisioner.model_path(), b"model").unwrap();

        // Unreachable source URL: the chunk fetch fails, the partial stays.
        match provisioner.ensure_available().await {
            ProvisionStatus::Partial { progress } => {
                assert!(progress > 0.0 && progress < 100.0);
            }
            other => panic!("expected Partial, got {:?}", other),
        }
        assert_eq!(std::fs::read(provisioner.model_path()).unwrap(), b"model");
    }

    #[test]
    fn progress_is_a_percentage() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(b"0123456789");
        let provisioner = ModelProvisioner::new(dir.path(), spec);
        assert_eq!(provisioner.progress(), 0.0);

        std::fs::write(provisioner.model_path(), b"01234").unwrap();
        assert_eq!(provisioner.progress(), 50.0);
    }
}
