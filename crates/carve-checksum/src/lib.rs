//! Streaming checksum engine.
//!
//! Computes a hex digest of a byte stream with a selectable algorithm from a
//! closed set, in constant memory regardless of input size. Used both at
//! ingestion (to stamp a file's original checksum) and after reconstruction
//! (to verify the merged output with the same recorded algorithm).

mod error;

use std::path::Path;

use carve_types::ChecksumAlgorithm;
use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

pub use error::ChecksumError;

/// Read buffer size for streaming digests.
const READ_BUF_BYTES: usize = 64 * 1024;

/// Resolve an algorithm name, case-insensitively.
///
/// This is the validation boundary for string tags arriving from
/// configuration; it fails with [`ChecksumError::UnsupportedAlgorithm`]
/// before any I/O happens.
pub fn parse_algorithm(name: &str) -> Result<ChecksumAlgorithm, ChecksumError> {
    match name.to_ascii_lowercase().as_str() {
        "md5" => Ok(ChecksumAlgorithm::Md5),
        "sha1" => Ok(ChecksumAlgorithm::Sha1),
        "sha256" => Ok(ChecksumAlgorithm::Sha256),
        "sha384" => Ok(ChecksumAlgorithm::Sha384),
        "sha512" => Ok(ChecksumAlgorithm::Sha512),
        _ => Err(ChecksumError::UnsupportedAlgorithm(name.to_string())),
    }
}

fn hasher_for(algorithm: ChecksumAlgorithm) -> Box<dyn DynDigest + Send> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5::new()),
        ChecksumAlgorithm::Sha1 => Box::new(Sha1::new()),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256::new()),
        ChecksumAlgorithm::Sha384 => Box::new(Sha384::new()),
        ChecksumAlgorithm::Sha512 => Box::new(Sha512::new()),
    }
}

/// Compute the hex digest of an async byte stream.
///
/// Streams the input through a fixed buffer; any read failure aborts with
/// [`ChecksumError::Io`] and no partial digest.
pub async fn digest_reader(
    algorithm: ChecksumAlgorithm,
    mut reader: impl AsyncRead + Unpin,
) -> Result<String, ChecksumError> {
    let mut hasher = hasher_for(algorithm);
    let mut buf = vec![0u8; READ_BUF_BYTES];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(to_hex(&hasher.finalize_reset()))
}

/// Compute the hex digest of a file on disk.
pub async fn digest_file(
    algorithm: ChecksumAlgorithm,
    path: impl AsRef<Path>,
) -> Result<String, ChecksumError> {
    let path = path.as_ref();
    debug!(%algorithm, path = %path.display(), "computing checksum");
    let file = tokio::fs::File::open(path).await?;
    let digest = digest_reader(algorithm, file).await?;
    debug!(%algorithm, path = %path.display(), %digest, "checksum computed");
    Ok(digest)
}

/// Case-insensitive digest comparison.
///
/// Digests are stamped lowercase by this crate, but records written by other
/// tooling may carry uppercase hex.
pub fn matches(computed: &str, recorded: &str) -> bool {
    computed.eq_ignore_ascii_case(recorded)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
