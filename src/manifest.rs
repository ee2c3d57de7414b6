//! Manifest of successful replication outcomes.
//!
//! The manifest is advisory: the authoritative result of a replication run
//! is the set of outcomes held in memory, so a failed write is reported to
//! the operator and never fails the run.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One successfully replicated image.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ManifestEntry {
    /// Account the image was copied to.
    pub account_id: String,
    /// Region the copied image lives in.
    pub region: String,
    /// Identifier of the copied image.
    pub image_id: String,
}

/// Errors raised while reading or writing a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Serialization failed.
    #[error("failed to encode manifest: {0}")]
    Encode(#[from] serde_json::Error),
    /// The sink could not be written or read.
    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes `entries` to `path` as a pretty-printed JSON array.
///
/// # Errors
///
/// Returns [`ManifestError`] when encoding or the filesystem write fails.
pub async fn write_manifest(path: &Utf8Path, entries: &[ManifestEntry]) -> Result<(), ManifestError> {
    let encoded = serde_json::to_vec_pretty(entries)?;
    tokio::fs::write(path, encoded).await?;
    Ok(())
}

/// Reads a manifest previously produced by [`write_manifest`].
///
/// # Errors
///
/// Returns [`ManifestError`] when the file cannot be read or decoded.
pub async fn read_manifest(path: &Utf8Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;

    fn entry(account: &str, image: &str) -> ManifestEntry {
        ManifestEntry {
            account_id: account.to_owned(),
            region: "us-east-1".to_owned(),
            image_id: image.to_owned(),
        }
    }

    fn manifest_path(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().join("manifest.json"))
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()))
    }

    #[tokio::test]
    async fn round_trips_every_entry() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = manifest_path(&tmp);
        let entries = vec![
            entry("222222222222", "ami-aaa"),
            entry("333333333333", "ami-bbb"),
            entry("444444444444", "ami-ccc"),
        ];

        write_manifest(&path, &entries)
            .await
            .unwrap_or_else(|err| panic!("write manifest: {err}"));
        let read_back = read_manifest(&path)
            .await
            .unwrap_or_else(|err| panic!("read manifest: {err}"));

        assert_eq!(read_back, entries);
    }

    #[tokio::test]
    async fn uses_the_wire_field_names() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = manifest_path(&tmp);
        write_manifest(&path, &[entry("222222222222", "ami-abc")])
            .await
            .unwrap_or_else(|err| panic!("write manifest: {err}"));

        let raw = tokio::fs::read_to_string(&path)
            .await
            .unwrap_or_else(|err| panic!("read manifest: {err}"));
        for field in ["\"account_id\"", "\"region\"", "\"image_id\""] {
            assert!(raw.contains(field), "missing {field} in {raw}");
        }
    }

    #[tokio::test]
    async fn write_failure_surfaces_an_error() {
        let missing_dir = Utf8PathBuf::from("/nonexistent-imageferry/manifest.json");
        let result = write_manifest(&missing_dir, &[entry("222222222222", "ami-abc")]).await;
        assert!(matches!(result, Err(ManifestError::Io(_))));
    }
}
