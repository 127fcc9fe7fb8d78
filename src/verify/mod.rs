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

//! Bounded-concurrency verification of proxy nodes.
//!
//! [`VerificationPool::run`] takes a batch of records, probes each one
//! through the [`ProxyDialer`] capability with at most a fixed number of
//! probes in flight, and hands the results to the [`BatchMerger`] which
//! writes them to the store in a single pass. Individual failures never
//! fail the run, they only show up in the returned [`RunSummary`].

use std::{sync::Arc, time::Duration};

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info};
use rand::{rngs::OsRng, seq::SliceRandom};
use smol::{lock::Semaphore, Executor};

use crate::{
    node::{Fingerprint, NodeRecord, NodeUpdate, STATUS_ALIVE},
    settings::SettingsPtr,
    store::NodeStorePtr,
    system::{timeout::timeout, CancelToken},
    util::time::unix_timestamp,
    Error, Result,
};

/// Two-step capability classification
pub mod capability;

/// Dial capability, probe client trait and client pooling
pub mod client;
pub use client::{ClientLease, ClientPool, ProbeClient, ProbeMethod, ProbeRequest, ProbeResponse, ProxyDialer};

/// Country of egress lookup
pub mod geo;
pub use geo::{GeoResolver, GeoStrategy};

/// Debounced batch merging into the store
pub mod merger;
pub use merger::{BatchMerger, BatchMergerPtr, MergeBatch, MergeOutcome};

/// Reachability and speed probes
pub mod probe;
use probe::SpeedGate;

/// Which checks a run performs on every node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CheckKinds {
    pub alive: bool,
    pub speed_down: bool,
    pub speed_up: bool,
    pub country: bool,
    pub tiktok: bool,
    /// Skip speed probes for nodes that already hold samples
    pub skip_measured: bool,
}

impl Default for CheckKinds {
    fn default() -> Self {
        Self {
            alive: true,
            speed_down: false,
            speed_up: false,
            country: true,
            tiktok: false,
            skip_measured: true,
        }
    }
}

#[derive(Clone)]
pub struct RunOptions {
    /// Requested number of concurrent probes
    pub concurrency: usize,
    /// Deadline for dialing a node and its reachability probe
    pub timeout: Duration,
    pub checks: CheckKinds,
    /// Overall run deadline. Cancels `cancel` once reached.
    pub deadline: Option<Duration>,
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 16,
            timeout: Duration::from_secs(5),
            checks: CheckKinds::default(),
            deadline: None,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Nodes whose probing ran to completion
    pub checked: usize,
    pub alive_count: usize,
    pub dead_count: usize,
    /// Nodes that could not be dialed or were never launched
    pub skipped: usize,
    /// Mean reachability delay over alive nodes of this run
    pub avg_delay_ms: u64,
    pub cancelled: bool,
    pub message: String,
}

/// Result of probing one node
enum NodeOutcome {
    Alive { delay: u16, update: Box<NodeResult> },
    Dead { fingerprint: Fingerprint, stored: bool },
    /// Reachability was not checked, only the other facets
    Unchecked { update: Box<NodeResult> },
    Skipped,
}

struct NodeResult {
    record: NodeRecord,
    stored: bool,
    updates: Vec<NodeUpdate>,
}

pub type VerificationPoolPtr<D> = Arc<VerificationPool<D>>;

pub struct VerificationPool<D: ProxyDialer> {
    store: NodeStorePtr,
    dialer: Arc<D>,
    clients: Arc<ClientPool<D::Client>>,
    geo: GeoResolver,
    settings: SettingsPtr,
    merger: BatchMergerPtr,
    executor: Arc<Executor<'static>>,
}

impl<D: ProxyDialer> VerificationPool<D> {
    pub fn new(
        store: NodeStorePtr,
        dialer: D,
        settings: SettingsPtr,
        executor: Arc<Executor<'static>>,
    ) -> VerificationPoolPtr<D> {
        let geo = GeoResolver::new(Duration::from_millis(settings.geo_timeout));
        Self::with_geo(store, dialer, geo, settings, executor)
    }

    pub fn with_geo(
        store: NodeStorePtr,
        dialer: D,
        geo: GeoResolver,
        settings: SettingsPtr,
        executor: Arc<Executor<'static>>,
    ) -> VerificationPoolPtr<D> {
        let merger = BatchMerger::new(
            store.clone(),
            Duration::from_millis(settings.merge_debounce),
            executor.clone(),
        );

        Arc::new(Self {
            store,
            dialer: Arc::new(dialer),
            clients: ClientPool::new(settings.client_pool_idle),
            geo,
            settings,
            merger,
            executor,
        })
    }

    pub fn store(&self) -> NodeStorePtr {
        self.store.clone()
    }

    pub fn clients(&self) -> &Arc<ClientPool<D::Client>> {
        &self.clients
    }

    /// Probe `nodes` and merge the results into the store.
    ///
    /// Records already in the store get their metrics and status updated,
    /// and lose their alive bit if the reachability probe fails. New records
    /// are only inserted if they answered the reachability probe. Cancelling
    /// `opts.cancel` stops new probes from being launched and aborts the
    /// ones in flight. Whatever completed is still merged.
    pub async fn run(self: &Arc<Self>, mut nodes: Vec<NodeRecord>, opts: RunOptions) -> RunSummary {
        let total = nodes.len();
        let workers = opts.concurrency.min(total).min(self.settings.max_workers);
        if workers == 0 {
            debug!(target: "verify::pool::run()", "Nothing to check");
            return RunSummary { message: "no nodes".to_string(), ..Default::default() }
        }

        info!(
            target: "verify::pool::run()",
            "Checking {} nodes with {} workers ({:?})", total, workers, opts.checks,
        );

        let cancel = opts.cancel.clone();
        // Dropping the task at the end of the run disarms the deadline
        let _deadline = opts.deadline.map(|d| self.executor.spawn(cancel.deadline(d)));

        // Spread the launch order so no feed is always probed last
        nodes.shuffle(&mut OsRng);

        let semaphore = Arc::new(Semaphore::new(workers));
        let gate = Arc::new(SpeedGate::new(
            self.settings.speed_target_count,
            self.settings.speed_threshold,
        ));
        let opts = Arc::new(opts);
        let mut tasks = FuturesUnordered::new();

        for rec in nodes {
            let Some(permit) = cancel.run(semaphore.acquire_arc()).await else {
                debug!(target: "verify::pool::run()", "Cancelled, not launching further probes");
                break
            };

            let this = self.clone();
            let opts = opts.clone();
            let gate = gate.clone();
            tasks.push(self.executor.spawn(async move {
                let outcome = this.check_node(rec, &opts, &gate).await;
                drop(permit);
                outcome
            }));
        }

        let launched = tasks.len();
        let mut summary = RunSummary { skipped: total - launched, ..Default::default() };
        let mut batch = MergeBatch::default();
        let mut delay_sum = 0u64;
        let mut delay_count = 0u64;

        while let Some(outcome) = tasks.next().await {
            match outcome {
                NodeOutcome::Alive { delay, update } => {
                    summary.checked += 1;
                    summary.alive_count += 1;
                    delay_sum += u64::from(delay);
                    delay_count += 1;
                    stage(&mut batch, *update);
                }
                NodeOutcome::Dead { fingerprint, stored } => {
                    summary.checked += 1;
                    summary.dead_count += 1;
                    if stored {
                        let mut updates = vec![NodeUpdate::ClearStatus(STATUS_ALIVE)];
                        updates.extend(checked_now());
                        batch.updates.push((fingerprint, updates));
                    }
                }
                NodeOutcome::Unchecked { update } => {
                    summary.checked += 1;
                    if update.stored {
                        stage(&mut batch, *update);
                    }
                }
                NodeOutcome::Skipped => summary.skipped += 1,
            }
        }

        if delay_count > 0 {
            summary.avg_delay_ms = delay_sum / delay_count;
        }
        summary.cancelled = cancel.is_cancelled();

        let merged = self.merger.submit(batch).await;
        summary.message = format!(
            "checked {}/{}: {} alive, {} dead, {} skipped, avg delay {}ms{}",
            summary.checked,
            total,
            summary.alive_count,
            summary.dead_count,
            summary.skipped,
            summary.avg_delay_ms,
            if summary.cancelled { " (cancelled)" } else { "" },
        );

        info!(
            target: "verify::pool::run()",
            "{}; merge: {} updated, {} inserted", summary.message, merged.updated, merged.inserted,
        );
        summary
    }

    /// Run every enabled check against one node.
    async fn check_node(&self, rec: NodeRecord, opts: &RunOptions, gate: &SpeedGate) -> NodeOutcome {
        let fp = rec.fingerprint();
        let cancel = &opts.cancel;
        if cancel.is_cancelled() {
            return NodeOutcome::Skipped
        }

        let stored = self.store.contains(fp).await;
        let mut client = self.clients.checkout(|| self.dialer.new_client());

        let dialed = cancel.run(timeout(opts.timeout, self.dialer.dial(&mut *client, &rec.raw_config)));
        match dialed.await {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => {
                debug!(target: "verify::pool::check_node()", "[{:016x}] Dial failed: {}", fp, e);
                return NodeOutcome::Skipped
            }
            Some(Err(_)) => {
                debug!(target: "verify::pool::check_node()", "[{:016x}] Dial timed out", fp);
                return NodeOutcome::Skipped
            }
            None => return NodeOutcome::Skipped,
        }

        let mut updates = vec![];
        let mut delay = None;

        if opts.checks.alive {
            let alive = cancel.run(probe::check_alive(&mut *client, &self.settings, opts.timeout));
            match alive.await {
                Some(Ok(d)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Alive, {}ms", fp, d);
                    updates.push(NodeUpdate::Delay(d));
                    updates.push(NodeUpdate::SetStatus(STATUS_ALIVE));
                    delay = Some(d);
                }
                Some(Err(e)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Dead: {}", fp, e);
                    return NodeOutcome::Dead { fingerprint: fp, stored }
                }
                None => return NodeOutcome::Skipped,
            }
        }

        // Past this point a cancellation keeps what was measured so far
        if let Err(e) = self.check_facets(&mut *client, &rec, opts, gate, &mut updates).await {
            debug!(target: "verify::pool::check_node()", "[{:016x}] Stopped early: {}", fp, e);
        }
        updates.extend(checked_now());

        let result = Box::new(NodeResult { record: rec, stored, updates });
        match delay {
            Some(delay) => NodeOutcome::Alive { delay, update: result },
            None => NodeOutcome::Unchecked { update: result },
        }
    }

    /// Speed, country and capability checks. Individual probe failures are
    /// logged and skipped; only cancellation ends the sequence.
    async fn check_facets(
        &self,
        client: &mut D::Client,
        rec: &NodeRecord,
        opts: &RunOptions,
        gate: &SpeedGate,
        updates: &mut Vec<NodeUpdate>,
    ) -> Result<()> {
        let fp = rec.fingerprint();
        let cancel = &opts.cancel;
        let checks = &opts.checks;

        let measure_down = checks.speed_down &&
            !(checks.skip_measured && rec.metrics.speed_down.has_data());
        if measure_down && gate.is_open() {
            match cancel.run(probe::check_speed_down(client, &self.settings)).await {
                Some(Ok(rate)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Down {} B/ms", fp, rate);
                    gate.record(rate);
                    updates.push(NodeUpdate::SpeedDown(rate));
                }
                Some(Err(e)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Download probe: {}", fp, e)
                }
                None => return Err(Error::ProbeCancelled),
            }
        }

        let measure_up =
            checks.speed_up && !(checks.skip_measured && rec.metrics.speed_up.has_data());
        if measure_up && gate.is_open() {
            match cancel.run(probe::check_speed_up(client, &self.settings)).await {
                Some(Ok(rate)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Up {} B/ms", fp, rate);
                    updates.push(NodeUpdate::SpeedUp(rate));
                }
                Some(Err(e)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Upload probe: {}", fp, e)
                }
                None => return Err(Error::ProbeCancelled),
            }
        }

        // Country is sticky, only resolve it once
        if checks.country && rec.country.is_none() {
            match self.geo.resolve(client, cancel).await {
                Some(country) => updates.push(NodeUpdate::Country(country)),
                None if cancel.is_cancelled() => return Err(Error::ProbeCancelled),
                None => debug!(target: "verify::pool::check_node()", "[{:016x}] Country unresolved", fp),
            }
        }

        if checks.tiktok {
            match cancel.run(capability::check(client, &self.settings)).await {
                Some(Ok(cap)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Capability {:?}", fp, cap);
                    updates.extend(cap.updates());
                }
                Some(Err(e)) => {
                    debug!(target: "verify::pool::check_node()", "[{:016x}] Capability probe: {}", fp, e)
                }
                None => return Err(Error::ProbeCancelled),
            }
        }

        Ok(())
    }
}

/// Timestamp update for a finished check. Omitted if the clock is broken.
fn checked_now() -> Option<NodeUpdate> {
    unix_timestamp().ok().map(NodeUpdate::Checked)
}

/// Queue a probed node for the merge. Stored records receive updates, new
/// ones are inserted with the updates already applied.
fn stage(batch: &mut MergeBatch, result: NodeResult) {
    let NodeResult { mut record, stored, updates } = result;
    if stored {
        batch.updates.push((record.fingerprint(), updates));
        return
    }

    for update in &updates {
        record.apply(update);
    }
    batch.inserts.push(record);
}
