//! In-flight request table.
//!
//! Every entry is removed exactly once: by the receive path when the matching
//! response arrives, by [`PendingTable::fail_all`] on disconnect or stop, or by
//! the caller's [`PendingGuard`] when the call times out or its future is
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::RpcError;

type Slot = oneshot::Sender<Result<Value, RpcError>>;

struct PendingEntry {
    method: String,
    deadline: Instant,
    slot: Slot,
}

/// Correlation table shared by the request path and the receive path.
#[derive(Clone, Default)]
pub(crate) struct PendingTable {
    entries: Arc<Mutex<HashMap<u64, PendingEntry>>>,
}

impl PendingTable {
    /// Register a call and return its guard and result receiver.
    pub fn register(
        &self,
        id: u64,
        method: &str,
        deadline: Instant,
    ) -> (PendingGuard, oneshot::Receiver<Result<Value, RpcError>>) {
        let (slot, rx) = oneshot::channel();
        self.entries.lock().insert(
            id,
            PendingEntry {
                method: method.to_string(),
                deadline,
                slot,
            },
        );
        let guard = PendingGuard {
            table: self.clone(),
            id,
        };
        (guard, rx)
    }

    /// Deliver an outcome to the caller waiting on `id`.
    ///
    /// Returns `false` if no such call is in flight (late or unknown response).
    pub fn resolve(&self, id: u64, outcome: Result<Value, RpcError>) -> bool {
        let entry = self.entries.lock().remove(&id);
        match entry {
            Some(entry) => {
                if entry.deadline < Instant::now() {
                    tracing::debug!(id, method = %entry.method, "Response arrived after deadline");
                }
                // The caller may have gone away between removal and send.
                let _ = entry.slot.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight call with the error produced by `make_error`.
    ///
    /// Returns the number of calls failed.
    pub fn fail_all(&self, make_error: impl Fn() -> RpcError) -> usize {
        let drained: Vec<(u64, PendingEntry)> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(id, method = %entry.method, "Failing in-flight request");
            let _ = entry.slot.send(Err(make_error()));
        }
        count
    }

    /// Number of calls currently in flight.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }
}

/// Removes its entry from the table when dropped.
pub(crate) struct PendingGuard {
    table: PendingTable,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
