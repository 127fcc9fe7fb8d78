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

use std::collections::BTreeMap;

use crate::node::{CountryCode, NodeRecord};

/// Aggregates over one group of records. Averages only consider members
/// with at least one liveness bit set, and a metric only counts members
/// that actually hold data for it. Empty groups report zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub count: usize,
    pub alive: usize,
    pub avg_delay: u16,
    pub avg_speed_up: u32,
    pub avg_speed_down: u32,
    pub avg_risk: u8,
}

/// Point-in-time aggregate view of the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub capacity: usize,
    pub total: GroupStats,
    pub by_subscription: BTreeMap<u16, GroupStats>,
    /// `None` collects nodes whose country is not resolved yet
    pub by_country: BTreeMap<Option<CountryCode>, GroupStats>,
}

#[derive(Default)]
pub(super) struct GroupAccumulator {
    count: usize,
    alive: usize,
    delay: (u64, u64),
    speed_up: (u64, u64),
    speed_down: (u64, u64),
    risk: (u64, u64),
}

impl GroupAccumulator {
    pub fn add(&mut self, rec: &NodeRecord) {
        self.count += 1;
        if !rec.is_alive() {
            return
        }
        self.alive += 1;

        if rec.metrics.delay.has_data() {
            accumulate(&mut self.delay, rec.avg_delay().into());
        }
        if rec.metrics.speed_up.has_data() {
            accumulate(&mut self.speed_up, rec.avg_speed_up().into());
        }
        if rec.metrics.speed_down.has_data() {
            accumulate(&mut self.speed_down, rec.avg_speed_down().into());
        }
        accumulate(&mut self.risk, rec.risk.into());
    }

    pub fn finish(&self) -> GroupStats {
        GroupStats {
            count: self.count,
            alive: self.alive,
            avg_delay: u16::try_from(mean(self.delay)).unwrap_or(u16::MAX),
            avg_speed_up: u32::try_from(mean(self.speed_up)).unwrap_or(u32::MAX),
            avg_speed_down: u32::try_from(mean(self.speed_down)).unwrap_or(u32::MAX),
            avg_risk: u8::try_from(mean(self.risk)).unwrap_or(u8::MAX),
        }
    }
}

fn accumulate(acc: &mut (u64, u64), value: u64) {
    acc.0 += value;
    acc.1 += 1;
}

/// Division guarded against empty groups
fn mean((sum, n): (u64, u64)) -> u64 {
    if n == 0 {
        return 0
    }
    sum / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{tests::record, NodeUpdate, STATUS_ALIVE};

    #[test]
    fn empty_group_reports_zero() {
        assert_eq!(GroupAccumulator::default().finish(), GroupStats::default());
    }

    #[test]
    fn dead_members_counted_but_not_averaged() {
        let mut acc = GroupAccumulator::default();

        let mut a = record("5.5.5.5", 1, &[100]);
        a.apply(&NodeUpdate::Risk(10));
        let mut b = record("6.6.6.6", 1, &[300]);
        b.apply(&NodeUpdate::SpeedDown(500));
        b.apply(&NodeUpdate::Risk(30));
        let mut dead = record("7.7.7.7", 1, &[5]);
        dead.apply(&NodeUpdate::ClearStatus(STATUS_ALIVE));

        acc.add(&a);
        acc.add(&b);
        acc.add(&dead);

        let stats = acc.finish();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.alive, 2);
        assert_eq!(stats.avg_delay, 200);
        // Only b has download data
        assert_eq!(stats.avg_speed_down, 500);
        assert_eq!(stats.avg_speed_up, 0);
        assert_eq!(stats.avg_risk, 20);
    }
}
