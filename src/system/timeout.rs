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

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use smol::Timer;

/// Await `f` for at most `dur`. Probes wrap every network call in this so
/// a stalled proxy can never hold a worker past its budget.
pub async fn timeout<F, T>(dur: Duration, f: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    Bounded { inner: f, timer: Timer::after(dur), budget: dur }.await
}

pin_project! {
    struct Bounded<F> {
        #[pin]
        inner: F,
        #[pin]
        timer: Timer,
        budget: Duration,
    }
}

impl<F: Future> Future for Bounded<F> {
    type Output = Result<F::Output, TimeoutError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(v) = this.inner.poll(cx) {
            return Poll::Ready(Ok(v))
        }

        match this.timer.poll(cx) {
            Poll::Ready(_) => Poll::Ready(Err(TimeoutError { budget: *this.budget })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The bounded future did not finish within its budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeoutError {
    budget: Duration,
}

impl TimeoutError {
    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl std::error::Error for TimeoutError {}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed out after {:?}", self.budget)
    }
}
