//! # Upload Archive
//!
//! Raw CSV copies kept on disk for auditing and estimator retraining.
//!
//! ```text
//! <upload_dir>/<YYYY-MM-DD>/<username>/{wifi,ble}_data_<unix>.csv
//! <negative_sample_dir>/{wifi,ble}_data_negative_<unix>.csv
//! <estimation_dir>/{positive,negative}_samples/<room>/{wifi,ble}_data_<unix>.csv
//! <fingerprint_dir>/<room>/{wifi,ble}_data_<unix>.csv
//! ```

use crate::config::StorageConfig;
use crate::pipeline::SignalUpload;
use chrono::NaiveDate;
use roomwatch_core::PresenceError;
use std::path::{Path, PathBuf};

/// Writes upload copies under the configured directories.
#[derive(Debug, Clone)]
pub struct Archive {
    upload_dir: PathBuf,
    negative_sample_dir: PathBuf,
    estimation_dir: PathBuf,
    fingerprint_dir: PathBuf,
}

impl Archive {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            upload_dir: storage.upload_dir.clone(),
            negative_sample_dir: storage.negative_sample_dir.clone(),
            estimation_dir: storage.estimation_dir.clone(),
            fingerprint_dir: storage.fingerprint_dir.clone(),
        }
    }

    /// Keep a copy of an accepted submit. Returns the directory written to.
    pub async fn store_upload(
        &self,
        date: NaiveDate,
        username: &str,
        stamp: i64,
        upload: &SignalUpload,
    ) -> Result<PathBuf, PresenceError> {
        let dir = self
            .upload_dir
            .join(date.format("%Y-%m-%d").to_string())
            .join(path_component(username)?);
        write_pair(
            &dir,
            &format!("wifi_data_{stamp}.csv"),
            &format!("ble_data_{stamp}.csv"),
            upload,
        )
        .await?;
        Ok(dir)
    }

    /// Keep an upload the inquiry service contradicted.
    pub async fn store_negative_sample(
        &self,
        stamp: i64,
        upload: &SignalUpload,
    ) -> Result<PathBuf, PresenceError> {
        write_pair(
            &self.negative_sample_dir,
            &format!("wifi_data_negative_{stamp}.csv"),
            &format!("ble_data_negative_{stamp}.csv"),
            upload,
        )
        .await?;
        Ok(self.negative_sample_dir.clone())
    }

    /// Keep a fingerprint survey sample. Room 0 is a negative sample.
    pub async fn store_fingerprint(
        &self,
        room: u64,
        stamp: i64,
        upload: &SignalUpload,
    ) -> Result<(), PresenceError> {
        let kind = if room == 0 {
            "negative_samples"
        } else {
            "positive_samples"
        };
        let room_dir = room.to_string();
        let wifi_name = format!("wifi_data_{stamp}.csv");
        let ble_name = format!("ble_data_{stamp}.csv");

        let training = self.estimation_dir.join(kind).join(&room_dir);
        write_pair(&training, &wifi_name, &ble_name, upload).await?;

        let survey = self.fingerprint_dir.join(&room_dir);
        write_pair(&survey, &wifi_name, &ble_name, upload).await
    }
}

async fn write_pair(
    dir: &Path,
    wifi_name: &str,
    ble_name: &str,
    upload: &SignalUpload,
) -> Result<(), PresenceError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_error(dir, &e))?;

    let wifi_path = dir.join(wifi_name);
    tokio::fs::write(&wifi_path, &upload.wifi)
        .await
        .map_err(|e| io_error(&wifi_path, &e))?;

    let ble_path = dir.join(ble_name);
    tokio::fs::write(&ble_path, &upload.ble)
        .await
        .map_err(|e| io_error(&ble_path, &e))
}

fn io_error(path: &Path, e: &std::io::Error) -> PresenceError {
    PresenceError::Io(format!("{}: {}", path.display(), e))
}

/// A single path segment. Rejects anything that could climb out of its
/// parent directory.
fn path_component(name: &str) -> Result<&str, PresenceError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(PresenceError::InvalidInput(format!(
            "'{name}' cannot be used as a directory name"
        )));
    }
    Ok(name)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn archive(root: &Path) -> Archive {
        Archive::new(&StorageConfig {
            database: root.join("db.redb"),
            upload_dir: root.join("uploads"),
            negative_sample_dir: root.join("negatives"),
            estimation_dir: root.join("estimation"),
            fingerprint_dir: root.join("fingerprint"),
        })
    }

    fn upload() -> SignalUpload {
        SignalUpload {
            wifi: b"lab,aa:bb,-40\n".to_vec(),
            ble: b"b,uuid-1,-60\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn upload_lands_under_date_and_user() {
        let temp = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let dir = archive(temp.path())
            .store_upload(date, "alice", 1_714_521_600, &upload())
            .await
            .unwrap();

        assert_eq!(dir, temp.path().join("uploads/2024-05-01/alice"));
        let wifi = std::fs::read(dir.join("wifi_data_1714521600.csv")).unwrap();
        assert_eq!(wifi, upload().wifi);
        assert!(dir.join("ble_data_1714521600.csv").exists());
    }

    #[tokio::test]
    async fn fingerprint_room_zero_is_negative() {
        let temp = tempfile::tempdir().unwrap();
        let archive = archive(temp.path());
        archive.store_fingerprint(0, 7, &upload()).await.unwrap();
        archive.store_fingerprint(3, 8, &upload()).await.unwrap();

        let root = temp.path();
        assert!(root.join("estimation/negative_samples/0/wifi_data_7.csv").exists());
        assert!(root.join("estimation/positive_samples/3/ble_data_8.csv").exists());
        assert!(root.join("fingerprint/3/wifi_data_8.csv").exists());
    }

    #[tokio::test]
    async fn negative_sample_names() {
        let temp = tempfile::tempdir().unwrap();
        archive(temp.path())
            .store_negative_sample(42, &upload())
            .await
            .unwrap();
        assert!(temp.path().join("negatives/ble_data_negative_42.csv").exists());
    }

    #[tokio::test]
    async fn traversal_in_username_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let result = archive(temp.path())
            .store_upload(date, "../etc", 1, &upload())
            .await;
        assert!(matches!(result, Err(PresenceError::InvalidInput(_))));
    }
}
