use crate::models::Order;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access order file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("order file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("order file {path} is empty")]
    Empty { path: PathBuf },
    #[error("failed to encode order: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable single-record store for the currently open order
///
/// The record is a JSON file. A missing file means no open position.
/// Writes go to a sibling temp file which is synced and then renamed over
/// the destination, so a reader never sees a half-written record.
#[derive(Debug, Clone)]
pub struct OrderStore {
    path: PathBuf,
}

impl OrderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "order".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Persist the open order, replacing any previous record
    pub fn save(&self, order: &Order) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(order)?;
        let tmp = self.tmp_path();

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        }

        let mut file = File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(&body).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        tracing::debug!(path = %self.path.display(), order_id = order.order_id, "Saved open order");
        Ok(())
    }

    /// Load the open order, reporting corruption as an error
    pub fn try_load(&self) -> Result<Option<Order>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };

        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(StoreError::Empty {
                path: self.path.clone(),
            });
        }

        // A literal `null` record also means no position
        let order: Option<Order> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(order)
    }

    /// Load the open order; unreadable records count as no position
    pub fn load(&self) -> Option<Order> {
        match self.try_load() {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!("Ignoring persisted order: {}", e);
                None
            }
        }
    }

    /// Remove the record (no position). Missing file is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}
