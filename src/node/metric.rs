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

/// Number of samples kept per metric.
pub const METRIC_WINDOW: usize = 5;

/// Unsigned integer types a [`RollingMetric`] can hold.
pub trait Sample: Copy + Default + PartialEq + Into<u64> + TryFrom<u64> {}

impl<T> Sample for T where T: Copy + Default + PartialEq + Into<u64> + TryFrom<u64> {}

/// Circular buffer of the last `N` samples of a metric.
///
/// A zero slot counts as "no sample yet" and is skipped by [`average`].
/// When no usable sample exists, [`average`] returns the `no_data` value
/// chosen at construction, so that records without data sort last:
/// `u16::MAX` for latency, `0` for throughput.
///
/// [`average`]: RollingMetric::average
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollingMetric<T, const N: usize = METRIC_WINDOW> {
    samples: [T; N],
    cursor: usize,
    full: bool,
    no_data: T,
}

impl<T: Sample, const N: usize> RollingMetric<T, N> {
    pub fn new(no_data: T) -> Self {
        Self { samples: [T::default(); N], cursor: 0, full: false, no_data }
    }

    /// Append a sample, overwriting the oldest once the window is full.
    pub fn update(&mut self, value: T) {
        if N == 0 {
            return
        }

        self.samples[self.cursor] = value;
        self.cursor = (self.cursor + 1) % N;
        if self.cursor == 0 {
            self.full = true;
        }
    }

    /// Mean of the non-zero samples.
    pub fn average(&self) -> T {
        let (sum, count) = self
            .filled()
            .iter()
            .filter(|v| **v != T::default())
            .fold((0u64, 0u64), |(sum, count), v| (sum + (*v).into(), count + 1));

        if count == 0 {
            // A window full of zeros holds real zero samples.
            if self.full {
                return T::default()
            }
            return self.no_data
        }

        // The mean never exceeds the largest sample, so this always fits.
        T::try_from(sum / count).unwrap_or(self.no_data)
    }

    /// Most recently written sample
    pub fn latest(&self) -> Option<T> {
        if self.is_empty() {
            return None
        }
        Some(self.samples[(self.cursor + N - 1) % N])
    }

    pub fn clear(&mut self) {
        self.samples = [T::default(); N];
        self.cursor = 0;
        self.full = false;
    }

    /// Number of samples written, capped at the window size.
    pub fn len(&self) -> usize {
        if self.full {
            N
        } else {
            self.cursor
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if at least one non-zero sample is held.
    pub fn has_data(&self) -> bool {
        self.filled().iter().any(|v| *v != T::default())
    }

    pub fn no_data(&self) -> T {
        self.no_data
    }

    fn filled(&self) -> &[T] {
        if self.full {
            &self.samples
        } else {
            &self.samples[..self.cursor]
        }
    }
}
