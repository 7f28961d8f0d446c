//! Content fingerprints used for server-side deduplication.
//!
//! Small files are hashed in full. Large files hash three sample windows
//! (head, middle, tail) and append the exact size and modification time.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::chunked::calculate_file_checksum;
use crate::{LARGE_FILE_THRESHOLD, TransferError};

/// Default sample window for sampled fingerprints: 1 MiB.
const DEFAULT_SAMPLE_WINDOW: u64 = 1024 * 1024;

/// Prefix marking tokens produced by the non-cryptographic fallback.
const WEAK_PREFIX: &str = "weak:";

/// Digest primitive used to build fingerprints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestBackend {
    /// SHA-256.
    #[default]
    Sha256,
    /// 32-bit rolling hash. Only for environments without a usable
    /// cryptographic digest; fingerprints are flagged [`Confidence::Weak`].
    Rolling,
}

/// How far a fingerprint can be trusted for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Strong,
    Weak,
}

/// Fingerprinting parameters.
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    pub backend: DigestBackend,
    /// Files strictly below this size are hashed in full.
    pub full_hash_limit: u64,
    /// Length of each of the three sample windows.
    pub sample_window: u64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            backend: DigestBackend::Sha256,
            full_hash_limit: LARGE_FILE_THRESHOLD,
            sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

/// A content fingerprint token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub token: String,
    pub confidence: Confidence,
    /// `true` if the token was built from sample windows.
    pub sampled: bool,
}

impl Fingerprint {
    /// Whether a server-side match on this token may skip the transfer.
    pub fn allows_dedup(&self) -> bool {
        self.confidence == Confidence::Strong
    }
}

/// Computes fingerprints for local files.
#[derive(Debug, Clone, Default)]
pub struct ContentAddresser {
    config: FingerprintConfig,
}

impl ContentAddresser {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Fingerprints `path` on the blocking pool so hashing a large file
    /// never stalls the async scheduler.
    pub async fn fingerprint(&self, path: &Path) -> Result<Fingerprint, TransferError> {
        let config = self.config.clone();
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || fingerprint_blocking(&path, &config))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(format!("hash task: {e}"))))?
    }
}

/// Synchronous fingerprint computation.
pub(crate) fn fingerprint_blocking(
    path: &Path,
    config: &FingerprintConfig,
) -> Result<Fingerprint, TransferError> {
    let metadata = std::fs::metadata(path)?;
    let size = metadata.len();

    if config.backend == DigestBackend::Rolling {
        warn!(
            path = %path.display(),
            "cryptographic digest unavailable, using rolling hash; dedup disabled for this file"
        );
    }

    if size < config.full_hash_limit {
        let token = match config.backend {
            DigestBackend::Sha256 => calculate_file_checksum(path)?,
            DigestBackend::Rolling => {
                let data = std::fs::read(path)?;
                format!("{WEAK_PREFIX}{}", rolling_hash(&data))
            }
        };
        debug!(path = %path.display(), size, "full fingerprint computed");
        return Ok(Fingerprint {
            token,
            confidence: confidence_of(config.backend),
            sampled: false,
        });
    }

    let samples = read_samples(path, size, config.sample_window)?;
    let digest = match config.backend {
        DigestBackend::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(&samples);
            hex::encode(hasher.finalize())
        }
        DigestBackend::Rolling => format!("{WEAK_PREFIX}{}", rolling_hash(&samples)),
    };
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);

    debug!(path = %path.display(), size, "sampled fingerprint computed");
    Ok(Fingerprint {
        token: format!("{digest}-{size}-{modified_ms}"),
        confidence: confidence_of(config.backend),
        sampled: true,
    })
}

fn confidence_of(backend: DigestBackend) -> Confidence {
    match backend {
        DigestBackend::Sha256 => Confidence::Strong,
        DigestBackend::Rolling => Confidence::Weak,
    }
}

/// Concatenates the head, middle, and tail windows.
fn read_samples(path: &Path, size: u64, window: u64) -> Result<Vec<u8>, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let middle = size / 2;
    let tail = size.saturating_sub(window);
    let mut out = Vec::with_capacity((window * 3) as usize);

    for start in [0, middle, tail] {
        let len = window.min(size - start);
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        out.extend_from_slice(&buf);
    }
    Ok(out)
}

/// 32-bit multiplicative rolling hash (`h = h * 31 + b`), hex encoded.
pub fn rolling_hash(data: &[u8]) -> String {
    let mut hash: i32 = 0;
    for &b in data {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(b));
    }
    format!("{:x}", hash.unsigned_abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum_bytes;
    use std::io::Write;
    use tempfile::TempDir;

    fn small_config(backend: DigestBackend) -> FingerprintConfig {
        FingerprintConfig {
            backend,
            full_hash_limit: 64,
            sample_window: 8,
        }
    }

    fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(data)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn small_file_gets_full_sha256() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "a.txt", b"tiny content");

        let fp = ContentAddresser::default().fingerprint(&path).await.unwrap();
        assert_eq!(fp.token, checksum_bytes(b"tiny content"));
        assert_eq!(fp.confidence, Confidence::Strong);
        assert!(!fp.sampled);
        assert!(fp.allows_dedup());
    }

    #[tokio::test]
    async fn large_file_is_sampled_with_size_suffix() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..200u8).collect();
        let path = write_file(dir.path(), "big.bin", &data);

        let addresser = ContentAddresser::new(small_config(DigestBackend::Sha256));
        let fp = addresser.fingerprint(&path).await.unwrap();
        assert!(fp.sampled);

        let mut expected = Vec::new();
        expected.extend_from_slice(&data[0..8]);
        expected.extend_from_slice(&data[100..108]);
        expected.extend_from_slice(&data[192..200]);
        let prefix = format!("{}-200-", checksum_bytes(&expected));
        assert!(fp.token.starts_with(&prefix), "token {}", fp.token);
    }

    #[tokio::test]
    async fn sampled_fingerprint_ignores_unsampled_bytes() {
        let dir = TempDir::new().unwrap();
        let a: Vec<u8> = vec![1; 200];
        let mut b = a.clone();
        b[50] = 9; // outside every sample window
        let pa = write_file(dir.path(), "a.bin", &a);
        let pb = write_file(dir.path(), "b.bin", &b);

        let cfg = small_config(DigestBackend::Sha256);
        let fa = fingerprint_blocking(&pa, &cfg).unwrap();
        let fb = fingerprint_blocking(&pb, &cfg).unwrap();
        let digest = |t: &str| t.split('-').next().unwrap().to_string();
        assert_eq!(digest(&fa.token), digest(&fb.token));
    }

    #[tokio::test]
    async fn rolling_backend_is_weak() {
        let dir = TempDir::new().unwrap();
        let path = write_file(dir.path(), "a.txt", b"abc");

        let addresser = ContentAddresser::new(small_config(DigestBackend::Rolling));
        let fp = addresser.fingerprint(&path).await.unwrap();
        assert_eq!(fp.confidence, Confidence::Weak);
        assert!(!fp.allows_dedup());
        assert!(fp.token.starts_with("weak:"));
    }

    #[test]
    fn rolling_hash_known_values() {
        assert_eq!(rolling_hash(b""), "0");
        // 'a' = 97 = 0x61
        assert_eq!(rolling_hash(b"a"), "61");
        // ((97 * 31) + 98) = 3105 = 0xc21
        assert_eq!(rolling_hash(b"ab"), "c21");
    }

    #[test]
    fn rolling_hash_wraps_without_panicking() {
        let data = vec![0xffu8; 10_000];
        assert!(!rolling_hash(&data).is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = ContentAddresser::default()
            .fingerprint(&dir.path().join("nope"))
            .await;
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}
