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

//! Coalesces the results of pool runs into as few store passes as possible.
//!
//! The first batch submitted after a quiet period schedules a flush after
//! the debounce window. Batches submitted before the flush runs join it.
//! Every submitter waits until the flush that carried its batch is done.

use std::{mem, sync::Arc, time::Duration};

use log::{debug, info};
use smol::{
    channel::{Receiver, Sender},
    lock::Mutex,
    Executor, Timer,
};

use crate::{
    node::{Fingerprint, NodeRecord, NodeUpdate},
    store::NodeStorePtr,
};

/// Results of one or more runs waiting to be written to the store.
#[derive(Default)]
pub struct MergeBatch {
    /// Updates for records that were already stored when probed
    pub updates: Vec<(Fingerprint, Vec<NodeUpdate>)>,
    /// Newly verified records
    pub inserts: Vec<NodeRecord>,
}

impl MergeBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty()
    }

    fn append(&mut self, mut other: MergeBatch) {
        self.updates.append(&mut other.updates);
        self.inserts.append(&mut other.inserts);
    }
}

/// What a flush wrote to the store
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub updated: usize,
    pub inserted: usize,
    /// Records that were removed from the store while being probed
    pub missing: usize,
}

/// Completion signal of one scheduled flush. Nothing is sent on the
/// channel, the flush stores its outcome and closes it.
struct FlushSignal {
    send: Sender<()>,
    recv: Receiver<()>,
    outcome: Mutex<MergeOutcome>,
}

#[derive(Default)]
struct Pending {
    batch: MergeBatch,
    /// Set while a flush is scheduled
    flush: Option<Arc<FlushSignal>>,
}

pub type BatchMergerPtr = Arc<BatchMerger>;

pub struct BatchMerger {
    store: NodeStorePtr,
    debounce: Duration,
    pending: Mutex<Pending>,
    executor: Arc<Executor<'static>>,
}

impl BatchMerger {
    pub fn new(
        store: NodeStorePtr,
        debounce: Duration,
        executor: Arc<Executor<'static>>,
    ) -> BatchMergerPtr {
        Arc::new(Self { store, debounce, pending: Mutex::new(Pending::default()), executor })
    }

    /// Queue `batch` and wait until it has been written. Returns the
    /// outcome of the flush that carried it, which includes the batches of
    /// every other submitter that joined it.
    pub async fn submit(self: &Arc<Self>, batch: MergeBatch) -> MergeOutcome {
        if batch.is_empty() {
            return MergeOutcome::default()
        }

        let signal = {
            let mut pending = self.pending.lock().await;
            pending.batch.append(batch);

            match &pending.flush {
                Some(signal) => signal.clone(),
                None => {
                    let (send, recv) = smol::channel::bounded(1);
                    let signal =
                        Arc::new(FlushSignal { send, recv, outcome: Mutex::new(Default::default()) });
                    pending.flush = Some(signal.clone());

                    let this = self.clone();
                    self.executor
                        .spawn(async move {
                            Timer::after(this.debounce).await;
                            this.flush().await;
                        })
                        .detach();

                    signal
                }
            }
        };

        // Only returns once the channel is closed
        let _ = signal.recv.recv().await;
        let outcome = signal.outcome.lock().await.clone();
        outcome
    }

    async fn flush(&self) {
        let (batch, signal) = {
            let mut pending = self.pending.lock().await;
            (mem::take(&mut pending.batch), pending.flush.take())
        };

        debug!(
            target: "verify::merger::flush()",
            "Flushing {} updates and {} new records", batch.updates.len(), batch.inserts.len(),
        );

        let missing = self.store.update_records(&batch.updates).await;
        let updated = batch.updates.len() - missing.len();
        let inserted = self.store.insert_merge(batch.inserts).await;
        let outcome = MergeOutcome { updated, inserted, missing: missing.len() };

        info!(
            target: "verify::merger::flush()",
            "Merge pass: {} updated, {} inserted, {} gone", updated, inserted, outcome.missing,
        );

        if let Some(signal) = signal {
            *signal.outcome.lock().await = outcome;
            signal.send.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::{tests::record, STATUS_ALIVE},
        store::NodeStore,
    };

    #[test]
    fn concurrent_submits_share_a_flush() {
        let ex = Arc::new(Executor::new());
        smol::block_on(ex.clone().run(async {
            let store = NodeStore::new(10);
            let existing = record("old", 1, &[100]);
            let fp = existing.fingerprint();
            store.insert_merge(vec![existing]).await;

            let sub = store.subscribe().await;
            let merger = BatchMerger::new(store.clone(), Duration::from_millis(50), ex.clone());

            let a = MergeBatch {
                updates: vec![(fp, vec![NodeUpdate::ClearStatus(STATUS_ALIVE)])],
                inserts: vec![record("x", 1, &[30])],
            };
            let b = MergeBatch { updates: vec![], inserts: vec![record("y", 2, &[40])] };

            let (ra, rb) = futures::join!(merger.submit(a), merger.submit(b));
            assert_eq!(ra, rb);
            assert_eq!(ra, MergeOutcome { updated: 1, inserted: 2, missing: 0 });

            assert_eq!(store.len().await, 3);
            assert!(!store.get(fp).await.unwrap().is_alive());
            // Both batches landed in a single insert pass
            assert_eq!(sub.receive().await, crate::store::StoreEvent::Inserted(2));
            assert!(sub.try_receive().is_none());

            assert_eq!(merger.submit(MergeBatch::default()).await, MergeOutcome::default());
        }));
    }
}
