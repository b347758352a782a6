//! Persisted serial configuration snapshot
//!
//! A small JSON file holding the last serial settings the operator chose, so
//! the next session can pre-fill them.

use std::path::{Path, PathBuf};

use errors::MeterResult;
use meter_modbus::SerialConfig;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot, creating parent directories as needed
    pub async fn save(&self, config: &SerialConfig) -> MeterResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(&self.path, data).await?;
        info!("Serial snapshot saved: {}", self.path.display());
        Ok(())
    }

    /// `None` when nothing has been saved yet
    pub async fn load(&self) -> MeterResult<Option<SerialConfig>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No serial snapshot at {}", self.path.display());
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };
        let config = serde_json::from_slice(&data)?;
        Ok(Some(config))
    }

    /// Remove the snapshot; a missing file is not an error
    pub async fn clear(&self) -> MeterResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Serial snapshot cleared: {}", self.path.display());
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use meter_modbus::{Parity, StopBits};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("data/saved_serial_config.json"));

        assert!(store.load().await.unwrap().is_none());

        let mut cfg = SerialConfig::new("/dev/ttyUSB1", 12);
        cfg.baud_rate = 19200;
        cfg.parity = Parity::Even;
        cfg.stop_bits = StopBits::Two;
        store.save(&cfg).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(cfg));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        // second clear is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_reads_snapshot_written_by_hand() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(
            &path,
            r#"{"port":"COM3","baudRate":9600,"dataBits":8,"stopBits":0,"parity":1,"slaveID":7}"#,
        )
        .unwrap();

        let cfg = SnapshotStore::new(&path).load().await.unwrap().unwrap();
        assert_eq!(cfg.port, "COM3");
        assert_eq!(cfg.parity, Parity::Odd);
        assert_eq!(cfg.stop_bits, StopBits::One);
        assert_eq!(cfg.slave_id, 7);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SnapshotStore::new(&path).load().await.is_err());
    }
}
