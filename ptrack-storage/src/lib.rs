//! ptrack Storage - Record Store and Store-Wide Operations
//!
//! Holds the conversation-scoped record store together with everything
//! that operates on it as a whole: coalesced persistence, legacy
//! migration, orphan reconciliation and display resolution.

pub mod display;
pub mod flush;
pub mod migrate;
pub mod reconcile;
pub mod store;

pub use display::{resolve, DisplayInfo, DisplayModel, RecordView};
pub use flush::{DebouncedFlusher, FlushScheduler, JsonFileSink, MetadataSink};
pub use migrate::migrate_legacy;
pub use reconcile::{Reconciler, SweepReport, SweepState};
pub use store::RecordStore;

#[cfg(test)]
pub(crate) mod testing {
    use crate::flush::FlushScheduler;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Counts schedules and flushes, remembering the newest snapshot.
    ///
    /// Keep in step with `ptrack_test_utils::CountingFlusher`, which cannot
    /// be used here because test-utils depends on this crate.
    #[derive(Default)]
    pub struct CountingFlusher {
        scheduled: AtomicUsize,
        flushes: AtomicUsize,
        last: Mutex<Option<Value>>,
    }

    impl CountingFlusher {
        pub fn scheduled(&self) -> usize {
            self.scheduled.load(Ordering::SeqCst)
        }

        pub fn flushes(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }

        pub fn last_snapshot(&self) -> Option<Value> {
            self.last.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FlushScheduler for CountingFlusher {
        fn schedule_flush(&self, snapshot: Value) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(snapshot);
        }

        async fn flush(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Parks every `flush` until `release` is notified.
    #[derive(Default)]
    pub struct GatedFlusher {
        pub entered: Notify,
        pub release: Notify,
    }

    #[async_trait]
    impl FlushScheduler for GatedFlusher {
        fn schedule_flush(&self, _snapshot: Value) {}

        async fn flush(&self) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}
