//! Active-execution table and admission

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tether_types::{DeviceId, ExecutionId, ExecutionMode, RuntimeType};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecutionError, Result};
use crate::types::ExecutionStatusReport;

#[derive(Debug, Clone)]
pub(crate) struct ActiveExecution {
    pub execution_id: ExecutionId,
    pub device_id: DeviceId,
    pub runtime_type: RuntimeType,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub timeout: Duration,
    pub cancellation: CancellationToken,
    pub lines_completed: usize,
    pub lines_total: usize,
}

impl ActiveExecution {
    pub fn report(&self) -> ExecutionStatusReport {
        let elapsed = self.started.elapsed();
        ExecutionStatusReport {
            execution_id: self.execution_id,
            device_id: self.device_id.clone(),
            runtime_type: self.runtime_type,
            mode: self.mode,
            started_at: self.started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            timeout_ms: self.timeout.as_millis() as u64,
            estimated_remaining_ms: self.timeout.saturating_sub(elapsed).as_millis() as u64,
            lines_completed: self.lines_completed,
            lines_total: self.lines_total,
        }
    }
}

/// Table of in-flight executions, at most one per device
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveTable {
    inner: Arc<Mutex<HashMap<DeviceId, ActiveExecution>>>,
}

impl ActiveTable {
    /// Check both limits and insert under one lock
    pub fn admit(&self, execution: ActiveExecution, limit: usize) -> Result<ActiveGuard> {
        let mut table = self.inner.lock();
        if table.contains_key(&execution.device_id) {
            return Err(ExecutionError::AlreadyExecuting(execution.device_id));
        }
        if table.len() >= limit {
            return Err(ExecutionError::ConcurrencyLimitExceeded { limit });
        }

        let guard = ActiveGuard {
            table: self.clone(),
            device_id: execution.device_id.clone(),
            execution_id: execution.execution_id,
        };
        table.insert(execution.device_id.clone(), execution);
        Ok(guard)
    }

    pub fn take(&self, device_id: &DeviceId) -> Option<ActiveExecution> {
        self.inner.lock().remove(device_id)
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<ActiveExecution> {
        self.inner.lock().get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn reports(&self) -> Vec<ExecutionStatusReport> {
        let mut reports: Vec<_> = self.inner.lock().values().map(ActiveExecution::report).collect();
        reports.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        reports
    }

    /// Update line progress, only if the record still belongs to `execution_id`
    pub fn set_progress(&self, device_id: &DeviceId, execution_id: ExecutionId, completed: usize) {
        if let Some(active) = self.inner.lock().get_mut(device_id) {
            if active.execution_id == execution_id {
                active.lines_completed = completed;
            }
        }
    }
}

/// Removes the active record on drop
///
/// A record already replaced by a newer execution on the same device is
/// left alone.
#[derive(Debug)]
pub(crate) struct ActiveGuard {
    table: ActiveTable,
    device_id: DeviceId,
    execution_id: ExecutionId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut table = self.table.inner.lock();
        if table
            .get(&self.device_id)
            .is_some_and(|a| a.execution_id == self.execution_id)
        {
            table.remove(&self.device_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(device: &str) -> ActiveExecution {
        ActiveExecution {
            execution_id: ExecutionId::generate(),
            device_id: DeviceId::new(device),
            runtime_type: RuntimeType::CircuitPython,
            mode: ExecutionMode::Repl,
            started_at: Utc::now(),
            started: Instant::now(),
            timeout: Duration::from_secs(30),
            cancellation: CancellationToken::new(),
            lines_completed: 0,
            lines_total: 0,
        }
    }

    #[tokio::test]
    async fn test_admission_limits() {
        let table = ActiveTable::default();
        let _a = table.admit(execution("a"), 2).unwrap();

        assert!(matches!(
            table.admit(execution("a"), 2),
            Err(ExecutionError::AlreadyExecuting(_))
        ));

        let _b = table.admit(execution("b"), 2).unwrap();
        assert!(matches!(
            table.admit(execution("c"), 2),
            Err(ExecutionError::ConcurrencyLimitExceeded { limit: 2 })
        ));
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_guard_removes_own_record_only() {
        let table = ActiveTable::default();
        let first = table.admit(execution("a"), 5).unwrap();

        // Interrupt removes the record and a new execution takes the slot
        table.take(&DeviceId::new("a"));
        let second = table.admit(execution("a"), 5).unwrap();

        drop(first);
        assert_eq!(table.len(), 1);

        drop(second);
        assert_eq!(table.len(), 0);
    }
}
