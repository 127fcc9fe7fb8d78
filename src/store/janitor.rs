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

use std::sync::Arc;

use log::{debug, info};
use smol::Executor;

use super::NodeStorePtr;
use crate::{
    system::{sleep, StoppableTask, StoppableTaskPtr},
    Error,
};

pub type JanitorPtr = Arc<Janitor>;

/// Periodically evicts records whose average delay has drifted above a
/// ceiling, freeing capacity for the next merge.
pub struct Janitor {
    store: NodeStorePtr,
    max_delay: u16,
    interval: u64,
    process: StoppableTaskPtr,
}

impl Janitor {
    /// `interval` is in seconds.
    pub fn new(store: NodeStorePtr, max_delay: u16, interval: u64) -> JanitorPtr {
        Arc::new(Self { store, max_delay, interval, process: StoppableTask::new() })
    }

    /// Start the sweep loop on `executor`. A ceiling of zero disables it.
    pub fn start(self: Arc<Self>, executor: Arc<Executor<'static>>) {
        if self.max_delay == 0 {
            info!(target: "store::janitor::start()", "Delay ceiling is 0, janitor disabled");
            return
        }

        self.process.clone().start(
            async move {
                self.run().await;
                unreachable!();
            },
            // Ignore stop handler
            |_| async {},
            Error::DetachedTaskStopped,
            executor,
        );
    }

    pub async fn stop(&self) {
        self.process.stop().await
    }

    /// A single sweep. Returns the number of evicted records.
    pub async fn sweep(&self) -> usize {
        let removed = self.store.remove_slow(self.max_delay).await;
        if removed > 0 {
            info!(
                target: "store::janitor::sweep()",
                "Evicted {} nodes slower than {}ms", removed, self.max_delay,
            );
        }
        removed
    }

    async fn run(self: Arc<Self>) {
        debug!(target: "store::janitor::run()", "START");
        loop {
            self.sweep().await;
            debug!(target: "store::janitor::run()", "Sleeping...");
            sleep(self.interval).await;
        }
    }
}
