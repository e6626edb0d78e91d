//! Orphan reconciliation.
//!
//! A sweep deletes every stored fingerprint that no longer matches a live
//! AI reply or variant in the conversation. Sweeps are mutually exclusive:
//!
//! ```text
//! Idle ─── sweep() ──→ Running ─── (done | failed | dropped) ──→ Idle
//!                         │
//!                    sweep() → ConcurrentOperation (no mutation)
//! ```
//!
//! The `Running` state covers the whole operation, including the awaited
//! flush, and is released by a drop guard on every exit path.

use crate::store::RecordStore;
use ptrack_core::{live_fingerprints, ChatMessage, Fingerprint, TrackerError, TrackerResult};
use std::collections::HashSet;
use std::sync::Mutex;

const OPERATION: &str = "Orphan cleanup";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SweepState {
    #[default]
    Idle,
    Running,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries in the store when the sweep started.
    pub scanned: usize,
    pub removed: usize,
    pub retained: usize,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    state: Mutex<SweepState>,
}

/// Holds `Running` for its lifetime.
struct SweepGuard<'a> {
    state: &'a Mutex<SweepState>,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = SweepState::Idle;
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SweepState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_begin(&self) -> TrackerResult<SweepGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SweepState::Running {
            tracing::warn!("Orphan cleanup already in progress");
            return Err(TrackerError::ConcurrentOperation {
                operation: OPERATION.to_string(),
            });
        }
        *state = SweepState::Running;
        Ok(SweepGuard { state: &self.state })
    }

    /// Sweep `store` against the live replies of `messages`.
    pub async fn sweep(
        &self,
        store: &RecordStore,
        messages: &[ChatMessage],
    ) -> TrackerResult<SweepReport> {
        let _guard = self.try_begin()?;
        let live = live_fingerprints(messages);
        tracing::debug!(live = live.len(), "Live fingerprints collected");
        Self::sweep_running(store, &live).await
    }

    /// Sweep `store` against an already computed live set.
    pub async fn sweep_against(
        &self,
        store: &RecordStore,
        live: &HashSet<Fingerprint>,
    ) -> TrackerResult<SweepReport> {
        let _guard = self.try_begin()?;
        Self::sweep_running(store, live).await
    }

    async fn sweep_running(
        store: &RecordStore,
        live: &HashSet<Fingerprint>,
    ) -> TrackerResult<SweepReport> {
        let report = store.apply(|entries| {
            let scanned = entries.len();
            entries.retain(|key, _| {
                let keep = live.contains(key);
                if !keep {
                    tracing::debug!(key = %key, "Deleting orphaned preset record");
                }
                keep
            });
            let removed = scanned - entries.len();
            let report = SweepReport {
                scanned,
                removed,
                retained: entries.len(),
            };
            (report, removed > 0)
        })?;

        if report.removed > 0 {
            store.flush().await;
        }
        tracing::info!(
            scanned = report.scanned,
            removed = report.removed,
            retained = report.retained,
            "Orphan cleanup completed"
        );
        Ok(report)
    }
}
