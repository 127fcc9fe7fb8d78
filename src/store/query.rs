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

use crate::node::{status::has_all, CountryCode, NodeRecord, StatusFlag};

/// Predicate for [`super::NodeStore::filtered_query`]. Unset fields match
/// everything. The country is resolved through its bucket index, every
/// other field is checked by a residual scan over that bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub country: Option<CountryCode>,
    /// All of these status bits must be set
    pub status_mask: Option<StatusFlag>,
    pub min_speed_up: Option<u32>,
    pub min_speed_down: Option<u32>,
    pub max_delay: Option<u16>,
    pub max_risk: Option<u8>,
    pub subscription: Option<u16>,
    /// Cap on the number of returned records
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn country(mut self, country: CountryCode) -> Self {
        self.country = Some(country);
        self
    }

    pub fn status(mut self, mask: StatusFlag) -> Self {
        self.status_mask = Some(mask);
        self
    }

    pub fn min_speed_up(mut self, speed: u32) -> Self {
        self.min_speed_up = Some(speed);
        self
    }

    pub fn min_speed_down(mut self, speed: u32) -> Self {
        self.min_speed_down = Some(speed);
        self
    }

    pub fn max_delay(mut self, delay: u16) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn max_risk(mut self, risk: u8) -> Self {
        self.max_risk = Some(risk);
        self
    }

    pub fn subscription(mut self, id: u16) -> Self {
        self.subscription = Some(id);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Residual predicate. The country is checked too, so this is usable on
    /// its own when no bucket narrowed the input.
    pub fn matches(&self, rec: &NodeRecord) -> bool {
        if let Some(country) = self.country {
            if rec.country != Some(country) {
                return false
            }
        }

        if let Some(mask) = self.status_mask {
            if !has_all(rec.status, mask) {
                return false
            }
        }

        if let Some(min) = self.min_speed_up {
            if rec.avg_speed_up() < min {
                return false
            }
        }

        if let Some(min) = self.min_speed_down {
            if rec.avg_speed_down() < min {
                return false
            }
        }

        if let Some(max) = self.max_delay {
            if rec.avg_delay() > max {
                return false
            }
        }

        if let Some(max) = self.max_risk {
            if rec.risk > max {
                return false
            }
        }

        if let Some(id) = self.subscription {
            if rec.subscription_id != id {
                return false
            }
        }

        true
    }
}

/// Ordering for [`super::NodeStore::top_by`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    /// Lowest average delay first
    Delay,
    /// Highest average upload speed first
    SpeedUp,
    /// Highest average download speed first
    SpeedDown,
    /// Lowest risk first
    Risk,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{tests::record, NodeUpdate, STATUS_ALIVE, STATUS_TIKTOK};

    #[test]
    fn empty_filter_matches_everything() {
        let rec = record("3.3.3.3", 1, &[]);
        assert!(NodeFilter::new().matches(&rec));
    }

    #[test]
    fn residual_predicates() {
        let mut rec = record("4.4.4.4", 2, &[150]);
        rec.apply(&NodeUpdate::SpeedDown(900));
        rec.apply(&NodeUpdate::Risk(20));
        rec.apply(&NodeUpdate::Country("SG".parse().unwrap()));

        assert!(NodeFilter::new().max_delay(150).matches(&rec));
        assert!(!NodeFilter::new().max_delay(149).matches(&rec));
        assert!(NodeFilter::new().min_speed_down(900).matches(&rec));
        assert!(!NodeFilter::new().min_speed_up(1).matches(&rec));
        assert!(!NodeFilter::new().max_risk(10).matches(&rec));
        assert!(NodeFilter::new().status(STATUS_ALIVE).matches(&rec));
        assert!(!NodeFilter::new().status(STATUS_ALIVE | STATUS_TIKTOK).matches(&rec));
        assert!(NodeFilter::new().country("sg".parse().unwrap()).matches(&rec));
        assert!(!NodeFilter::new().country("US".parse().unwrap()).matches(&rec));
        assert!(!NodeFilter::new().subscription(3).matches(&rec));
    }
}
