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

//! Cancellation signal modelled on the stop channel of [`super::StoppableTask`].
//! Nothing is ever sent on the channel; cancelling closes it, which wakes
//! every waiter at once.

use std::{future::Future, time::Duration};

use smol::Timer;

/// Cloneable cancellation handle. All clones observe the same signal.
#[derive(Clone)]
pub struct CancelToken {
    send: smol::channel::Sender<()>,
    recv: smol::channel::Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (send, recv) = smol::channel::bounded(1);
        Self { send, recv }
    }

    /// Cancel the token. Idempotent.
    pub fn cancel(&self) {
        self.send.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.send.is_closed()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        // recv() only returns once the channel is closed
        let _ = self.recv.recv().await;
    }

    /// Returns a future that cancels this token after `dur`.
    /// Spawn it and keep the task handle alive for as long as the
    /// deadline should apply.
    pub fn deadline(&self, dur: Duration) -> impl Future<Output = ()> + Send + 'static {
        let token = self.clone();
        async move {
            Timer::after(dur).await;
            token.cancel();
        }
    }

    /// Run `fut` unless the token gets cancelled first, in which case `None`
    /// is returned and `fut` is dropped.
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return None
        }

        smol::future::or(async { Some(fut.await) }, async {
            self.cancelled().await;
            None
        })
        .await
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
