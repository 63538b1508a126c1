//! Binding metadata persistence
//!
//! Only [`BindingRecord`]s are stored. Runtime instances are never persisted.

use async_trait::async_trait;
use dashmap::DashMap;
use tether_types::DeviceId;

use crate::binding::BindingRecord;
use crate::error::Result;

/// Storage for binding metadata
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Insert or replace the record for its device
    async fn save(&self, record: &BindingRecord) -> Result<()>;

    /// Remove the record for a device
    async fn remove(&self, device_id: &DeviceId) -> Result<()>;

    /// Load every stored record
    async fn load_all(&self) -> Result<Vec<BindingRecord>>;
}

/// In-memory binding store
#[derive(Default)]
pub struct InMemoryBindingStore {
    records: DashMap<DeviceId, BindingRecord>,
}

impl InMemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BindingStore for InMemoryBindingStore {
    async fn save(&self, record: &BindingRecord) -> Result<()> {
        self.records.insert(record.device_id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, device_id: &DeviceId) -> Result<()> {
        self.records.remove(device_id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<BindingRecord>> {
        let mut records: Vec<BindingRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(records)
    }
}
