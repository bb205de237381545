//! Last-known-good results per taxpayer, backed by `DashMap` for concurrent access.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meuiptu_api::TaxpayerId;
use serde::Serialize;

use crate::error::IptuError;
use crate::result::DebtQueryResult;

/// Read model for one tracked taxpayer.
///
/// `result` is the last successfully extracted record; failed cycles only
/// touch the bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub taxpayer_id: TaxpayerId,
    pub result: Option<DebtQueryResult>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub cycles: u64,
}

impl Snapshot {
    fn empty(taxpayer_id: TaxpayerId) -> Self {
        Self {
            taxpayer_id,
            result: None,
            last_attempt_at: None,
            last_success_at: None,
            last_error: None,
            consecutive_failures: 0,
            cycles: 0,
        }
    }

    /// `com_debito` / `sem_debito`, or `desconhecido` before the first success.
    pub fn state_label(&self) -> &'static str {
        self.result
            .as_ref()
            .map(DebtQueryResult::state_label)
            .unwrap_or("desconhecido")
    }
}

struct Slot {
    generation: u64,
    snapshot: Snapshot,
}

/// Thread-safe store of the latest snapshot per taxpayer.
///
/// Results are replaced whole, never patched, so readers always see either
/// the previous or the new record. Every registration gets a fresh
/// generation; writes carrying an older generation are dropped, so a cycle
/// from a removed registration never lands in a newer one.
#[derive(Default)]
pub struct ResultCache {
    store: DashMap<TaxpayerId, Slot>,
    next_generation: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `taxpayer` and returns the generation of its entry.
    /// Registering an already tracked taxpayer keeps the existing entry and
    /// its generation.
    pub fn register(&self, taxpayer: &TaxpayerId) -> u64 {
        match self.store.entry(taxpayer.clone()) {
            Entry::Occupied(slot) => slot.get().generation,
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                slot.insert(Slot {
                    generation,
                    snapshot: Snapshot::empty(taxpayer.clone()),
                });
                generation
            }
        }
    }

    /// Generation of the current entry for `taxpayer`, if tracked.
    pub fn generation(&self, taxpayer: &TaxpayerId) -> Option<u64> {
        self.store.get(taxpayer).map(|slot| slot.generation)
    }

    /// Stores a new result. Ignored unless the entry registered as
    /// `generation` is still current, so a late cycle neither resurrects a
    /// removed taxpayer nor writes into a later registration.
    pub fn record_success(&self, generation: u64, result: DebtQueryResult, at: DateTime<Utc>) {
        let Some(mut slot) = self.current(&result.taxpayer_id, generation) else {
            return;
        };
        let entry = &mut slot.snapshot;
        entry.result = Some(result);
        entry.last_attempt_at = Some(at);
        entry.last_success_at = Some(at);
        entry.last_error = None;
        entry.consecutive_failures = 0;
        entry.cycles += 1;
    }

    /// Records a failed cycle, leaving the previous result in place. Same
    /// generation rule as [`ResultCache::record_success`].
    pub fn record_failure(
        &self,
        taxpayer: &TaxpayerId,
        generation: u64,
        error: &IptuError,
        at: DateTime<Utc>,
    ) {
        let Some(mut slot) = self.current(taxpayer, generation) else {
            return;
        };
        let entry = &mut slot.snapshot;
        entry.last_attempt_at = Some(at);
        entry.last_error = Some(error.to_string());
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.cycles += 1;
    }

    fn current(
        &self,
        taxpayer: &TaxpayerId,
        generation: u64,
    ) -> Option<dashmap::mapref::one::RefMut<'_, TaxpayerId, Slot>> {
        let slot = self.store.get_mut(taxpayer)?;
        if slot.generation != generation {
            tracing::debug!(
                "Dropping stale write for {} (generation {}, current {})",
                taxpayer,
                generation,
                slot.generation
            );
            return None;
        }
        Some(slot)
    }

    /// Returns a copy of the snapshot for `taxpayer`.
    pub fn get(&self, taxpayer: &TaxpayerId) -> Option<Snapshot> {
        self.store.get(taxpayer).map(|slot| slot.snapshot.clone())
    }

    /// Returns the last good result for `taxpayer`, if any.
    pub fn result(&self, taxpayer: &TaxpayerId) -> Option<DebtQueryResult> {
        self.store
            .get(taxpayer)
            .and_then(|slot| slot.snapshot.result.clone())
    }

    pub fn remove(&self, taxpayer: &TaxpayerId) -> Option<Snapshot> {
        self.store.remove(taxpayer).map(|(_, slot)| slot.snapshot)
    }

    /// All snapshots, ordered by taxpayer id.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        let mut all: Vec<Snapshot> = self
            .store
            .iter()
            .map(|e| e.value().snapshot.clone())
            .collect();
        all.sort_by(|a, b| a.taxpayer_id.cmp(&b.taxpayer_id));
        all
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
