//! Console data file: orders, products and per-order metadata between runs

use dispatcher::store::{MemoryCatalog, MemoryOrderStore, StoreSnapshot};
use dispatcher::StoreError;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct DataFile {
    path: PathBuf,
    snapshot: StoreSnapshot,
    orders: Arc<MemoryOrderStore>,
    catalog: Arc<MemoryCatalog>,
}

impl DataFile {
    /// Loads the data file, starting empty when it does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            StoreSnapshot::load(&path)?
        } else {
            info!("{} not found, starting with no orders", path.display());
            StoreSnapshot::default()
        };

        debug!(
            "Loaded {} orders and {} products from {}",
            snapshot.orders.len(),
            snapshot.products.len(),
            path.display()
        );

        Ok(Self {
            orders: Arc::new(MemoryOrderStore::from_snapshot(&snapshot)),
            catalog: Arc::new(MemoryCatalog::from_snapshot(&snapshot)),
            path,
            snapshot,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn orders(&self) -> Arc<MemoryOrderStore> {
        Arc::clone(&self.orders)
    }

    pub fn catalog(&self) -> Arc<MemoryCatalog> {
        Arc::clone(&self.catalog)
    }

    /// Writes the current orders and metadata back to disk
    pub fn save(&mut self) -> Result<(), StoreError> {
        self.orders.export_into(&mut self.snapshot);
        self.snapshot.save(&self.path)?;
        debug!("Saved {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dispatcher::store::{DispatchMeta, SentMethod};
    use shared::Order;

    #[test]
    fn test_missing_file_starts_empty_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");

        let mut data = DataFile::open(&path).unwrap();
        data.orders().insert_order(Order::new(3));
        data.orders().mark_sent(3, SentMethod::Manual, Utc::now());
        data.save().unwrap();

        let reopened = DataFile::open(&path).unwrap();
        assert!(reopened.orders().dispatch_state(3).sent);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(DataFile::open(file.path()), Err(StoreError::Json(_))));
    }
}
