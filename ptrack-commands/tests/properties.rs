//! Property tests for the store-wide invariants.

use proptest::prelude::*;
use ptrack_core::live_fingerprints;
use ptrack_storage::{migrate_legacy, resolve, DisplayModel, Reconciler};
use ptrack_test_utils::fixtures::store_from;
use ptrack_test_utils::generators::{
    arb_ai_reply, arb_chat, arb_model, arb_preset_name, arb_preset_record, arb_stored_record,
};
use ptrack_test_utils::{ChatMessage, Fingerprint, PresetRecord, StoredRecord, VariantSelection};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

fn metadata_of(entries: &BTreeMap<String, StoredRecord>) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(key, record)| (key.clone(), record.to_json()))
            .collect::<Map<String, Value>>(),
    )
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The automatic path never replaces an existing entry; force-save
    /// always does.
    #[test]
    fn prop_insert_once_force_overwrites(
        existing in arb_stored_record(),
        candidate in arb_preset_record(),
    ) {
        let key = Fingerprint::from_raw("k");
        let (store, _flusher) = store_from(metadata_of(
            &[("k".to_string(), existing.clone())].into_iter().collect(),
        ));

        prop_assert!(!store.insert_if_absent(key.clone(), candidate.clone()).unwrap());
        prop_assert_eq!(store.get(&key).unwrap(), Some(existing));

        store.force_set(key.clone(), candidate.clone()).unwrap();
        prop_assert_eq!(store.get(&key).unwrap(), Some(StoredRecord::Record(candidate)));
    }

    /// Migration leaves only structured records and is idempotent.
    #[test]
    fn prop_migration_converts_every_legacy_entry(
        entries in prop::collection::btree_map("[a-z0-9_]{1,12}", arb_stored_record(), 0..12),
    ) {
        let legacy = entries.values().filter(|record| record.is_legacy()).count();
        let (store, flusher) = store_from(metadata_of(&entries));

        prop_assert_eq!(migrate_legacy(&store).unwrap(), legacy);
        prop_assert!(store.entries().unwrap().iter().all(|(_, record)| !record.is_legacy()));
        prop_assert_eq!(migrate_legacy(&store).unwrap(), 0);
        prop_assert_eq!(flusher.scheduled(), usize::from(legacy > 0));
        prop_assert_eq!(store.len().unwrap(), entries.len());
    }

    /// After a sweep every key is live, and exactly the dead keys are gone.
    #[test]
    fn prop_sweep_keeps_exactly_live_keys(
        chat in arb_chat(8),
        orphans in prop::collection::btree_set("orphan_[a-z0-9]{1,8}", 0..6),
        keep_mask in prop::collection::vec(any::<bool>(), 0..32),
    ) {
        let live = live_fingerprints(&chat);
        let mut stored_keys: BTreeMap<String, StoredRecord> = live
            .iter()
            .zip(keep_mask.iter().chain(std::iter::repeat(&true)))
            .filter(|(_, keep)| **keep)
            .map(|(key, _)| (key.to_string(), StoredRecord::Legacy("P".to_string())))
            .collect();
        for orphan in &orphans {
            stored_keys.insert(orphan.clone(), StoredRecord::Legacy("O".to_string()));
        }
        let before: HashSet<Fingerprint> =
            stored_keys.keys().map(|key| Fingerprint::from_raw(key.as_str())).collect();
        let dead = before.difference(&live).count();

        let (store, flusher) = store_from(metadata_of(&stored_keys));
        let report = block_on(Reconciler::new().sweep(&store, &chat)).unwrap();

        prop_assert_eq!(report.removed, dead);
        prop_assert_eq!(report.scanned, before.len());
        prop_assert!(store.keys().unwrap().iter().all(|key| live.contains(key)));
        prop_assert_eq!(flusher.flushes(), usize::from(dead > 0));
    }

    /// The forced model is displayed, but the lookup key always comes from
    /// the reply's own timestamp and model.
    #[test]
    fn prop_display_prefers_forced_model_without_rekeying(
        reply in arb_ai_reply(),
        preset in arb_preset_name(),
        forced in arb_model(),
    ) {
        let source = reply.active_source();
        let key = source.fingerprint().unwrap();
        let (store, _flusher) = store_from(Value::Object(Map::new()));
        store
            .force_set(
                key.clone(),
                PresetRecord {
                    gen_preset: Some(preset),
                    forced_model: Some(forced.clone()),
                    ..PresetRecord::default()
                },
            )
            .unwrap();

        let info = resolve(&reply, VariantSelection::Active, &store).unwrap();
        prop_assert_eq!(info.lookup_key, Some(key));
        prop_assert_eq!(info.model, DisplayModel::Forced(forced));
    }

    /// User and system messages never contribute live fingerprints.
    #[test]
    fn prop_live_set_ignores_non_ai_messages(chat in arb_chat(8)) {
        let ai_only: Vec<ChatMessage> = chat.iter().filter(|m| m.is_ai()).cloned().collect();
        prop_assert_eq!(live_fingerprints(&chat), live_fingerprints(&ai_only));
    }
}
