//! Legacy record migration.

use crate::store::RecordStore;
use ptrack_core::{PresetRecord, StoredRecord, TrackerResult};

/// Upgrade every bare-string entry to `{ genPreset: <string> }` in place.
///
/// Structured entries are left untouched. Returns the number of converted
/// entries; a flush is scheduled only when that number is non-zero. Running
/// it again right away converts nothing.
pub fn migrate_legacy(store: &RecordStore) -> TrackerResult<usize> {
    let converted = store.apply(|entries| {
        let mut converted = 0usize;
        for record in entries.values_mut() {
            if let StoredRecord::Legacy(name) = record {
                let name = std::mem::take(name);
                *record = StoredRecord::Record(PresetRecord::from_legacy(name));
                converted += 1;
            }
        }
        (converted, converted > 0)
    })?;

    if converted > 0 {
        tracing::info!(converted, "Legacy preset records migrated");
    } else {
        tracing::debug!("No legacy preset records to migrate");
    }
    Ok(converted)
}
