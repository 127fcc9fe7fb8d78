/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The node store is the single source of truth for verified nodes.
//!
//! Records live in one table keyed by fingerprint. Sorted indices (delay,
//! upload speed, download speed, risk) and bucket indices (country, status,
//! subscription membership) are kept in step with the table: every mutating
//! call holds the store's write lock and always removes a record from the
//! indices before changing it, then indexes it again. Readers share the
//! read lock.
//!
//! The store is bounded. Once full, [`NodeStore::insert_merge`] only admits
//! a candidate if it has a strictly lower average delay than the current
//! worst entry, so the population converges towards the fastest nodes seen.

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use log::{debug, info, trace, warn};
use smol::lock::RwLock;

use crate::{
    node::{
        status::has_all, CountryCode, Fingerprint, NodeRecord, NodeUpdate, StatusFlag,
        INVALID_FINGERPRINT,
    },
    system::{Subscriber, SubscriberPtr, Subscription},
    Error, Result,
};

/// Sorted and bucketed indices
mod index;
use index::{BucketIndex, SortedIndex};

/// Periodic maintenance of the store
pub mod janitor;
pub use janitor::{Janitor, JanitorPtr};

/// Query predicates and orderings
pub mod query;
pub use query::{NodeFilter, SortKey};

/// Aggregate statistics
pub mod stats;
use stats::GroupAccumulator;
pub use stats::{GroupStats, StoreStats};

/// Atomic pointer to the node store
pub type NodeStorePtr = Arc<NodeStore>;

/// Membership changes published to store subscribers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// Records admitted by a merge
    Inserted(usize),
    /// Records replaced by better candidates during a merge
    Evicted(usize),
    /// Records removed explicitly or by maintenance
    Removed(usize),
}

/// Capacity-bounded, multi-indexed table of verified nodes
pub struct NodeStore {
    state: RwLock<StoreState>,
    capacity: usize,
    subscriber: SubscriberPtr<StoreEvent>,
}

#[derive(Default)]
struct StoreState {
    table: HashMap<Fingerprint, NodeRecord>,
    indices: Indices,
    members: Members,
}

struct Indices {
    by_delay: SortedIndex<u16>,
    by_speed_up: SortedIndex<Reverse<u32>>,
    by_speed_down: SortedIndex<Reverse<u32>>,
    by_risk: SortedIndex<u8>,
    by_country: BucketIndex<Option<CountryCode>>,
    by_status: BucketIndex<StatusFlag>,
}

/// Per-subscription member lists in insertion order, plus the round-robin
/// cursor of each subscription.
#[derive(Default)]
struct Members {
    lists: HashMap<u16, Vec<Fingerprint>>,
    cursors: HashMap<u16, usize>,
}

impl Default for Indices {
    fn default() -> Self {
        Self {
            by_delay: SortedIndex::new(),
            by_speed_up: SortedIndex::new(),
            by_speed_down: SortedIndex::new(),
            by_risk: SortedIndex::new(),
            by_country: BucketIndex::new(),
            by_status: BucketIndex::new(),
        }
    }
}

impl Indices {
    fn insert(&mut self, rec: &NodeRecord) {
        let fp = rec.fingerprint();
        trace!(target: "store::index", "Indexing {:016x}", fp);
        self.by_delay.insert(rec.avg_delay(), fp);
        self.by_speed_up.insert(Reverse(rec.avg_speed_up()), fp);
        self.by_speed_down.insert(Reverse(rec.avg_speed_down()), fp);
        self.by_risk.insert(rec.risk, fp);
        self.by_country.insert(rec.country, fp);
        self.by_status.insert(rec.status, fp);
    }

    fn remove(&mut self, rec: &NodeRecord) {
        let fp = rec.fingerprint();
        trace!(target: "store::index", "De-indexing {:016x}", fp);
        self.by_delay.remove(rec.avg_delay(), fp);
        self.by_speed_up.remove(Reverse(rec.avg_speed_up()), fp);
        self.by_speed_down.remove(Reverse(rec.avg_speed_down()), fp);
        self.by_risk.remove(rec.risk, fp);
        self.by_country.remove(rec.country, fp);
        self.by_status.remove(rec.status, fp);
    }

    /// Check that `rec` is held exactly where its current values say.
    fn holds(&self, rec: &NodeRecord) -> bool {
        let fp = rec.fingerprint();
        self.by_delay.contains(rec.avg_delay(), fp) &&
            self.by_speed_up.contains(Reverse(rec.avg_speed_up()), fp) &&
            self.by_speed_down.contains(Reverse(rec.avg_speed_down()), fp) &&
            self.by_risk.contains(rec.risk, fp) &&
            self.by_country.contains(&rec.country, fp) &&
            self.by_status.contains(&rec.status, fp)
    }

    fn sorted(&self, key: SortKey) -> Box<dyn Iterator<Item = Fingerprint> + '_> {
        match key {
            SortKey::Delay => Box::new(self.by_delay.iter()),
            SortKey::SpeedUp => Box::new(self.by_speed_up.iter()),
            SortKey::SpeedDown => Box::new(self.by_speed_down.iter()),
            SortKey::Risk => Box::new(self.by_risk.iter()),
        }
    }
}

impl Members {
    fn add(&mut self, id: u16, fp: Fingerprint) {
        self.lists.entry(id).or_default().push(fp);
        // Positions shift with membership, restart the rotation
        self.cursors.insert(id, 0);
    }

    /// Drop every member of `id` that is in `gone`, in one pass.
    fn remove_all(&mut self, id: u16, gone: &HashSet<Fingerprint>) {
        let Some(list) = self.lists.get_mut(&id) else { return };
        list.retain(|fp| !gone.contains(fp));

        if list.is_empty() {
            self.lists.remove(&id);
            self.cursors.remove(&id);
        } else {
            self.cursors.insert(id, 0);
        }
    }

    /// Return the member under the cursor and advance it.
    fn next(&mut self, id: u16) -> Option<Fingerprint> {
        let list = self.lists.get(&id)?;
        if list.is_empty() {
            return None
        }

        let cursor = self.cursors.entry(id).or_insert(0);
        let pos = *cursor % list.len();
        *cursor = (pos + 1) % list.len();
        Some(list[pos])
    }
}

impl StoreState {
    fn insert(&mut self, rec: NodeRecord) {
        self.indices.insert(&rec);
        self.members.add(rec.subscription_id, rec.fingerprint());
        self.table.insert(rec.fingerprint(), rec);
    }

    /// Remove the given records and return how many were stored.
    /// Member lists are pruned once per affected subscription.
    fn remove_many(&mut self, fps: impl IntoIterator<Item = Fingerprint>) -> usize {
        let mut gone: HashMap<u16, HashSet<Fingerprint>> = HashMap::new();
        for fp in fps {
            let Some(rec) = self.table.remove(&fp) else { continue };
            self.indices.remove(&rec);
            gone.entry(rec.subscription_id).or_default().insert(fp);
        }

        let removed = gone.values().map(|s| s.len()).sum();
        for (id, fps) in gone {
            self.members.remove_all(id, &fps);
        }
        removed
    }

    fn update(&mut self, fp: Fingerprint, updates: &[NodeUpdate]) -> bool {
        let Some(rec) = self.table.get_mut(&fp) else { return false };

        self.indices.remove(rec);
        for update in updates {
            rec.apply(update);
        }
        self.indices.insert(rec);
        true
    }

    fn records<'a>(
        &'a self,
        fps: impl Iterator<Item = Fingerprint> + 'a,
    ) -> impl Iterator<Item = &'a NodeRecord> + 'a {
        fps.filter_map(move |fp| self.table.get(&fp))
    }
}

impl NodeStore {
    /// Create a new store holding at most `capacity` records.
    pub fn new(capacity: usize) -> NodeStorePtr {
        Arc::new(Self {
            state: RwLock::new(StoreState::default()),
            capacity,
            subscriber: Subscriber::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.table.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.table.is_empty()
    }

    pub async fn contains(&self, fp: Fingerprint) -> bool {
        self.state.read().await.table.contains_key(&fp)
    }

    pub async fn get(&self, fp: Fingerprint) -> Option<NodeRecord> {
        self.state.read().await.table.get(&fp).cloned()
    }

    /// Subscription ids that currently have members
    pub async fn subscriptions(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.state.read().await.members.lists.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Subscribe to membership changes.
    pub async fn subscribe(&self) -> Subscription<StoreEvent> {
        self.subscriber.clone().subscribe().await
    }

    /// Merge verified candidates into the store and return how many were
    /// admitted.
    ///
    /// Candidates are ordered by ascending average delay. Free capacity is
    /// filled first. The rest are walked in lockstep against the existing
    /// entries from the worst delay upwards, each candidate replacing the
    /// entry it is paired with while it is strictly faster. The first
    /// candidate that is not faster ends the merge and the remainder is
    /// dropped. Candidates already in the store are skipped.
    pub async fn insert_merge(&self, mut candidates: Vec<NodeRecord>) -> usize {
        debug!(target: "store::insert_merge()", "Merging {} candidates", candidates.len());

        candidates.retain(|c| c.fingerprint() != INVALID_FINGERPRINT);
        // Stable sort, so equal delays keep their arrival order
        candidates.sort_by_key(|c| c.avg_delay());
        let mut seen = HashSet::with_capacity(candidates.len());
        candidates.retain(|c| seen.insert(c.fingerprint()));

        let mut state = self.state.write().await;
        candidates.retain(|c| !state.table.contains_key(&c.fingerprint()));

        let free = self.capacity.saturating_sub(state.table.len());
        let mut remaining = candidates.into_iter();
        let mut inserted = 0;

        for candidate in remaining.by_ref().take(free) {
            state.insert(candidate);
            inserted += 1;
        }

        let mut evicted = 0;
        if !remaining.as_slice().is_empty() {
            let worst_first: Vec<Fingerprint> =
                state.indices.by_delay.iter().rev().take(remaining.len()).collect();
            let mut admitted = vec![];
            let mut replaced = vec![];

            for (candidate, worst) in remaining.zip(worst_first) {
                let Some(worst_delay) = state.table.get(&worst).map(|r| r.avg_delay()) else {
                    warn!(target: "store::insert_merge()", "Delay index points at missing {:016x}", worst);
                    break
                };

                if candidate.avg_delay() >= worst_delay {
                    trace!(
                        target: "store::insert_merge()",
                        "Candidate {:016x} ({}ms) not better than {:016x} ({}ms), stopping",
                        candidate.fingerprint(), candidate.avg_delay(), worst, worst_delay,
                    );
                    break
                }

                replaced.push(worst);
                admitted.push(candidate);
            }

            evicted = state.remove_many(replaced);
            for candidate in admitted {
                state.insert(candidate);
                inserted += 1;
            }
        }

        let total = state.table.len();
        drop(state);

        info!(
            target: "store::insert_merge()",
            "Merged {} nodes ({} evicted), store holds {}/{}",
            inserted, evicted, total, self.capacity,
        );

        if evicted > 0 {
            self.subscriber.notify(StoreEvent::Evicted(evicted)).await;
        }
        if inserted > 0 {
            self.subscriber.notify(StoreEvent::Inserted(inserted)).await;
        }

        inserted
    }

    /// Apply `updates` to one record. Returns false if it is not stored.
    pub async fn update_record(&self, fp: Fingerprint, updates: &[NodeUpdate]) -> bool {
        let updated = self.state.write().await.update(fp, updates);
        if !updated {
            debug!(target: "store::update_record()", "No record for {:016x}", fp);
        }
        updated
    }

    /// Apply a batch of updates under a single lock.
    /// Returns the fingerprints that were not found.
    pub async fn update_records(&self, batch: &[(Fingerprint, Vec<NodeUpdate>)]) -> Vec<Fingerprint> {
        let mut state = self.state.write().await;
        let missing: Vec<Fingerprint> = batch
            .iter()
            .filter(|(fp, updates)| !state.update(*fp, updates))
            .map(|(fp, _)| *fp)
            .collect();

        debug!(
            target: "store::update_records()",
            "Updated {} records, {} not stored", batch.len() - missing.len(), missing.len(),
        );
        missing
    }

    pub async fn remove_by_fingerprints(&self, fps: &[Fingerprint]) -> usize {
        let mut state = self.state.write().await;
        let removed = state.remove_many(fps.iter().copied());
        drop(state);

        self.notify_removed("store::remove_by_fingerprints()", removed).await;
        removed
    }

    /// Remove every record originating from subscription `id`.
    pub async fn remove_by_subscription(&self, id: u16) -> usize {
        let mut state = self.state.write().await;
        let fps = state.members.lists.get(&id).cloned().unwrap_or_default();
        let removed = state.remove_many(fps);
        drop(state);

        self.notify_removed("store::remove_by_subscription()", removed).await;
        removed
    }

    /// Maintenance pass: drop records whose average delay exceeds `max_delay`.
    pub async fn remove_slow(&self, max_delay: u16) -> usize {
        let mut state = self.state.write().await;
        let slow: Vec<Fingerprint> = state
            .table
            .values()
            .filter(|r| r.avg_delay() > max_delay)
            .map(|r| r.fingerprint())
            .collect();
        let removed = state.remove_many(slow);
        drop(state);

        self.notify_removed("store::remove_slow()", removed).await;
        removed
    }

    async fn notify_removed(&self, caller: &str, removed: usize) {
        debug!(target: "store", "{}: removed {} records", caller, removed);
        if removed > 0 {
            self.subscriber.notify(StoreEvent::Removed(removed)).await;
        }
    }

    /// Return the records matching `filter`, ordered by ascending delay.
    ///
    /// The candidate set comes from the narrowest index the filter names:
    /// the country bucket, then the subscription members, then the status
    /// buckets, and otherwise the delay index over the whole table. The
    /// remaining predicates are checked on that set.
    pub async fn filtered_query(&self, filter: &NodeFilter) -> Vec<NodeRecord> {
        let state = self.state.read().await;
        let limit = filter.limit.unwrap_or(usize::MAX);

        let mut found: Vec<&NodeRecord> = if let Some(country) = filter.country {
            match state.indices.by_country.get(&Some(country)) {
                Some(bucket) => state.records(bucket.iter().copied()).collect(),
                None => vec![],
            }
        } else if let Some(id) = filter.subscription {
            match state.members.lists.get(&id) {
                Some(list) => state.records(list.iter().copied()).collect(),
                None => vec![],
            }
        } else if let Some(mask) = filter.status_mask {
            let fps = state
                .indices
                .by_status
                .iter()
                .filter(move |(flags, _)| has_all(**flags, mask))
                .map(|(_, fp)| fp);
            state.records(fps).collect()
        } else {
            // Already in delay order
            let found: Vec<NodeRecord> = state
                .records(state.indices.by_delay.iter())
                .filter(|r| filter.matches(r))
                .take(limit)
                .cloned()
                .collect();
            return found
        };

        found.retain(|r| filter.matches(r));
        found.sort_by_key(|r| (r.avg_delay(), r.fingerprint()));
        found.into_iter().take(limit).cloned().collect()
    }

    /// Up to `n` records in the order given by `key`.
    pub async fn top_by(&self, key: SortKey, n: usize) -> Vec<NodeRecord> {
        let state = self.state.read().await;
        state.records(state.indices.sorted(key)).take(n).cloned().collect()
    }

    /// Round-robin over the members of subscription `id`. Each call returns
    /// the next member in insertion order, wrapping around at the end.
    pub async fn next_for_subscription(&self, id: u16) -> Option<NodeRecord> {
        let mut state = self.state.write().await;
        let fp = state.members.next(id)?;
        state.table.get(&fp).cloned()
    }

    /// Aggregate counts and averages, overall and grouped by subscription
    /// and by country.
    pub async fn stats_snapshot(&self) -> StoreStats {
        let state = self.state.read().await;

        let mut total = GroupAccumulator::default();
        let mut by_subscription: HashMap<u16, GroupAccumulator> = HashMap::new();
        let mut by_country: HashMap<Option<CountryCode>, GroupAccumulator> = HashMap::new();

        for rec in state.table.values() {
            total.add(rec);
            by_subscription.entry(rec.subscription_id).or_default().add(rec);
            by_country.entry(rec.country).or_default().add(rec);
        }

        StoreStats {
            capacity: self.capacity,
            total: total.finish(),
            by_subscription: by_subscription.iter().map(|(k, v)| (*k, v.finish())).collect(),
            by_country: by_country.iter().map(|(k, v)| (*k, v.finish())).collect(),
        }
    }

    /// Verify that every index holds exactly the records of the table.
    pub async fn check_consistency(&self) -> Result<()> {
        let state = self.state.read().await;
        let n = state.table.len();
        let idx = &state.indices;

        let sizes = [
            ("delay", idx.by_delay.len()),
            ("speed_up", idx.by_speed_up.len()),
            ("speed_down", idx.by_speed_down.len()),
            ("risk", idx.by_risk.len()),
            ("country", idx.by_country.len()),
            ("status", idx.by_status.len()),
            ("members", state.members.lists.values().map(|l| l.len()).sum::<usize>()),
        ];
        for (name, size) in sizes {
            if size != n {
                let e = format!("{} index holds {} entries, table holds {}", name, size, n);
                warn!(target: "store::check_consistency()", "{}", e);
                return Err(Error::StoreInconsistency(e))
            }
        }

        for (fp, rec) in state.table.iter() {
            let member = state
                .members
                .lists
                .get(&rec.subscription_id)
                .is_some_and(|list| list.contains(fp));

            if *fp != rec.fingerprint() || !idx.holds(rec) || !member {
                let e = format!("record {:016x} is not indexed under its current values", fp);
                warn!(target: "store::check_consistency()", "{}", e);
                return Err(Error::StoreInconsistency(e))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{tests::record, STATUS_ALIVE, STATUS_TIKTOK};

    fn delays(recs: &[NodeRecord]) -> Vec<u16> {
        recs.iter().map(|r| r.avg_delay()).collect()
    }

    #[test]
    fn merge_is_idempotent() {
        smol::block_on(async {
            let store = NodeStore::new(10);
            let batch = vec![record("a", 1, &[100]), record("b", 1, &[200]), record("a", 1, &[90])];

            assert_eq!(store.insert_merge(batch.clone()).await, 2);
            assert_eq!(store.insert_merge(batch).await, 0);
            assert_eq!(store.len().await, 2);

            // The faster duplicate in the batch won
            let a = record("a", 1, &[]).fingerprint();
            assert_eq!(store.get(a).await.unwrap().avg_delay(), 90);
            store.check_consistency().await.unwrap();
        });
    }

    #[test]
    fn merge_evicts_worst_while_strictly_better() {
        smol::block_on(async {
            let store = NodeStore::new(2);
            store.insert_merge(vec![record("a", 1, &[50]), record("b", 1, &[60])]).await;

            let admitted = store.insert_merge(vec![record("c", 1, &[40]), record("d", 1, &[70])]).await;
            assert_eq!(admitted, 1);

            let all = store.top_by(SortKey::Delay, 10).await;
            assert_eq!(delays(&all), vec![40, 50]);

            // A tie with the worst entry does not replace it
            assert_eq!(store.insert_merge(vec![record("e", 1, &[50])]).await, 0);
            assert!(!store.contains(record("e", 1, &[]).fingerprint()).await);
            store.check_consistency().await.unwrap();
        });
    }

    #[test]
    fn worst_delay_never_regresses() {
        smol::block_on(async {
            let store = NodeStore::new(8);
            let mut worst = u16::MAX;

            for round in 0..20u16 {
                let batch = (0..5u16)
                    .map(|i| {
                        let delay = 10 + (round * 37 + i * 101) % 900;
                        record(&format!("n{}-{}", round, i), i % 3, &[delay])
                    })
                    .collect();
                store.insert_merge(batch).await;
                assert!(store.len().await <= store.capacity());

                if store.len().await == store.capacity() {
                    let all = store.top_by(SortKey::Delay, usize::MAX).await;
                    let now = all.last().unwrap().avg_delay();
                    assert!(now <= worst);
                    worst = now;
                }
            }
            store.check_consistency().await.unwrap();
        });
    }

    #[test]
    fn updates_keep_indices_in_step() {
        smol::block_on(async {
            let store = NodeStore::new(10);
            let a = record("a", 1, &[100]);
            let b = record("b", 2, &[300]);
            let (fa, fb) = (a.fingerprint(), b.fingerprint());
            store.insert_merge(vec![a, b]).await;

            let de = "DE".parse().unwrap();
            assert!(
                store
                    .update_record(fa, &[NodeUpdate::Delay(900), NodeUpdate::Country(de)])
                    .await
            );
            let missing = store
                .update_records(&[
                    (fb, vec![NodeUpdate::SpeedDown(5000), NodeUpdate::SetStatus(STATUS_TIKTOK)]),
                    (12345, vec![NodeUpdate::Risk(3)]),
                ])
                .await;
            assert_eq!(missing, vec![12345]);
            store.check_consistency().await.unwrap();

            // a now averages (100 + 900) / 2
            assert_eq!(delays(&store.top_by(SortKey::Delay, 2).await), vec![300, 500]);
            assert_eq!(store.top_by(SortKey::SpeedDown, 1).await[0].fingerprint(), fb);

            let q = store.filtered_query(&NodeFilter::new().country(de)).await;
            assert_eq!(q.len(), 1);
            assert_eq!(q[0].fingerprint(), fa);

            // Clearing ALIVE also drops the country
            store.update_record(fa, &[NodeUpdate::ClearStatus(STATUS_ALIVE)]).await;
            assert!(store.filtered_query(&NodeFilter::new().country(de)).await.is_empty());
            store.check_consistency().await.unwrap();
        });
    }

    #[test]
    fn query_orders_by_delay_and_limits() {
        smol::block_on(async {
            let store = NodeStore::new(10);
            let mut batch = vec![
                record("a", 1, &[400]),
                record("b", 1, &[100]),
                record("c", 2, &[300]),
                record("d", 2, &[200]),
            ];
            batch[2].apply(&NodeUpdate::SetStatus(STATUS_TIKTOK));
            batch[3].apply(&NodeUpdate::SetStatus(STATUS_TIKTOK));
            store.insert_merge(batch).await;

            let all = store.filtered_query(&NodeFilter::new()).await;
            assert_eq!(delays(&all), vec![100, 200, 300, 400]);

            let tiktok = store.filtered_query(&NodeFilter::new().status(STATUS_TIKTOK)).await;
            assert_eq!(delays(&tiktok), vec![200, 300]);

            let sub1 = store.filtered_query(&NodeFilter::new().subscription(1).limit(1)).await;
            assert_eq!(delays(&sub1), vec![100]);

            let fast = store.filtered_query(&NodeFilter::new().max_delay(250)).await;
            assert_eq!(delays(&fast), vec![100, 200]);
        });
    }

    #[test]
    fn round_robin_wraps_per_subscription() {
        smol::block_on(async {
            let store = NodeStore::new(10);
            store
                .insert_merge(vec![
                    record("a", 7, &[10]),
                    record("b", 7, &[20]),
                    record("c", 7, &[30]),
                    record("x", 8, &[10]),
                ])
                .await;

            let mut seen = vec![];
            for _ in 0..6 {
                seen.push(store.next_for_subscription(7).await.unwrap().name);
            }
            assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
            assert_eq!(store.next_for_subscription(8).await.unwrap().name, "x");
            assert!(store.next_for_subscription(9).await.is_none());
            assert_eq!(store.subscriptions().await, vec![7, 8]);
        });
    }

    #[test]
    fn removals_notify_subscribers() {
        smol::block_on(async {
            let store = NodeStore::new(10);
            let sub = store.subscribe().await;

            store
                .insert_merge(vec![
                    record("a", 1, &[100]),
                    record("b", 1, &[3000]),
                    record("c", 2, &[200]),
                ])
                .await;
            assert_eq!(sub.receive().await, StoreEvent::Inserted(3));

            assert_eq!(store.remove_slow(1000).await, 1);
            assert_eq!(sub.receive().await, StoreEvent::Removed(1));

            assert_eq!(store.remove_by_subscription(2).await, 1);
            assert_eq!(store.subscriptions().await, vec![1]);

            let a = record("a", 1, &[]).fingerprint();
            assert_eq!(store.remove_by_fingerprints(&[a, a]).await, 1);
            assert!(store.is_empty().await);
            store.check_consistency().await.unwrap();
        });
    }

    #[test]
    fn bulk_removal_keeps_rotation_and_indices() {
        smol::block_on(async {
            let store = NodeStore::new(4000);
            let batch: Vec<NodeRecord> = (0..3000u16)
                .map(|i| {
                    let delay = if i % 2 == 0 { 100 } else { 2000 };
                    record(&format!("n{}", i), 1 + i % 3, &[delay])
                })
                .collect();
            assert_eq!(store.insert_merge(batch).await, 3000);

            assert_eq!(store.remove_slow(1000).await, 1500);
            assert_eq!(store.len().await, 1500);
            store.check_consistency().await.unwrap();

            // Survivors of subscription 1 keep their insertion order
            let first = store.next_for_subscription(1).await.unwrap();
            assert_eq!(first.name, "n0");
            assert_eq!(store.next_for_subscription(1).await.unwrap().name, "n6");
            assert_eq!(store.next_for_subscription(1).await.unwrap().name, "n12");

            assert_eq!(store.remove_by_subscription(1).await, 500);
            assert!(store.next_for_subscription(1).await.is_none());
            assert_eq!(store.subscriptions().await, vec![2, 3]);
            store.check_consistency().await.unwrap();

            let sub2: Vec<Fingerprint> = store
                .filtered_query(&NodeFilter::new().subscription(2))
                .await
                .iter()
                .map(|r| r.fingerprint())
                .collect();
            assert_eq!(store.remove_by_fingerprints(&sub2).await, 500);
            assert_eq!(store.subscriptions().await, vec![3]);
            assert_eq!(store.len().await, 500);
            store.check_consistency().await.unwrap();
        });
    }

    #[test]
    fn status_query_uses_status_buckets_only() {
        smol::block_on(async {
            let store = NodeStore::new(10);
            let mut batch = vec![record("a", 1, &[100]), record("b", 1, &[200]), record("c", 1, &[300])];
            batch[0].apply(&NodeUpdate::SetStatus(STATUS_TIKTOK));
            batch[2].apply(&NodeUpdate::SetStatus(STATUS_TIKTOK));
            store.insert_merge(batch).await;

            let both = store.filtered_query(&NodeFilter::new().status(STATUS_ALIVE | STATUS_TIKTOK)).await;
            assert_eq!(delays(&both), vec![100, 300]);

            let limited =
                store.filtered_query(&NodeFilter::new().status(STATUS_TIKTOK).max_delay(200)).await;
            assert_eq!(delays(&limited), vec![100]);
        });
    }

    #[test]
    fn empty_store_stats_are_zero() {
        smol::block_on(async {
            let store = NodeStore::new(4);
            let stats = store.stats_snapshot().await;
            assert_eq!(stats.capacity, 4);
            assert_eq!(stats.total, GroupStats::default());
            assert!(stats.by_subscription.is_empty());

            store.insert_merge(vec![record("a", 1, &[100]), record("b", 2, &[300])]).await;
            let stats = store.stats_snapshot().await;
            assert_eq!(stats.total.count, 2);
            assert_eq!(stats.total.avg_delay, 200);
            assert_eq!(stats.by_subscription[&2].avg_delay, 300);
            assert_eq!(stats.by_country[&None].count, 2);
        });
    }
}
