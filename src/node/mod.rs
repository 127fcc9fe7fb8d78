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

/// Two-letter country codes
pub mod country;
pub use country::CountryCode;

/// Identity hashing used to deduplicate nodes
pub mod fingerprint;
pub use fingerprint::{node_fingerprint, Fingerprint, INVALID_FINGERPRINT};

/// Proxy protocol variants and their identity fields
pub mod kind;
pub use kind::{IdentityField, ProxyKind};

/// Fixed-window rolling metrics
pub mod metric;
pub use metric::{RollingMetric, METRIC_WINDOW};

/// Liveness bit flags
pub mod status;
pub use status::{StatusFlag, STATUS_ALIVE, STATUS_ALL, STATUS_TIKTOK, STATUS_TIKTOK_IDC};

/// Identity fields of a node as produced by a subscription parser.
/// Which of them count towards the fingerprint depends on the [`ProxyKind`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_str: Option<String>,
    pub uuid: Option<String>,
    pub server_name: Option<String>,
}

/// A freshly parsed node that has not been verified yet.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub kind: ProxyKind,
    pub name: String,
    pub identity: Identity,
    /// Opaque protocol configuration, handed verbatim to the dialer
    pub raw_config: Vec<u8>,
    pub subscription_id: u16,
}

impl Candidate {
    pub fn fingerprint(&self) -> Fingerprint {
        node_fingerprint(self.kind, &self.identity)
    }

    /// Turn the candidate into a metric-less record.
    /// Returns `None` if the identity does not produce a valid fingerprint.
    pub fn into_record(self) -> Option<NodeRecord> {
        let fingerprint = self.fingerprint();
        if fingerprint == INVALID_FINGERPRINT {
            return None
        }

        Some(NodeRecord {
            fingerprint,
            kind: self.kind,
            name: self.name,
            identity: self.identity,
            raw_config: self.raw_config,
            subscription_id: self.subscription_id,
            metrics: NodeMetrics::default(),
            country: None,
            status: status::STATUS_NONE,
            risk: 0,
            last_checked: 0,
        })
    }
}

/// Rolling latency and throughput samples of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeMetrics {
    /// Round-trip delay in milliseconds
    pub delay: RollingMetric<u16>,
    /// Upload throughput in bytes/ms
    pub speed_up: RollingMetric<u32>,
    /// Download throughput in bytes/ms
    pub speed_down: RollingMetric<u32>,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            delay: RollingMetric::new(u16::MAX),
            speed_up: RollingMetric::new(0),
            speed_down: RollingMetric::new(0),
        }
    }
}

/// A verified proxy node as held by the store.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    fingerprint: Fingerprint,
    pub kind: ProxyKind,
    pub name: String,
    pub identity: Identity,
    pub raw_config: Vec<u8>,
    pub subscription_id: u16,
    pub metrics: NodeMetrics,
    /// Egress country, resolved once and kept until the node dies
    pub country: Option<CountryCode>,
    pub status: StatusFlag,
    /// Externally supplied abuse score
    pub risk: u8,
    /// Unix timestamp of the last completed check
    pub last_checked: u64,
}

/// A single mutation applied to a stored record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeUpdate {
    Delay(u16),
    SpeedUp(u32),
    SpeedDown(u32),
    Country(CountryCode),
    SetStatus(StatusFlag),
    ClearStatus(StatusFlag),
    Risk(u8),
    Checked(u64),
}

impl NodeRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn avg_delay(&self) -> u16 {
        self.metrics.delay.average()
    }

    pub fn avg_speed_up(&self) -> u32 {
        self.metrics.speed_up.average()
    }

    pub fn avg_speed_down(&self) -> u32 {
        self.metrics.speed_down.average()
    }

    /// Any liveness bit set
    pub fn is_alive(&self) -> bool {
        self.status != status::STATUS_NONE
    }

    pub fn has_status(&self, mask: StatusFlag) -> bool {
        status::has_all(self.status, mask)
    }

    pub fn apply(&mut self, update: &NodeUpdate) {
        match update {
            NodeUpdate::Delay(v) => self.metrics.delay.update(*v),
            NodeUpdate::SpeedUp(v) => self.metrics.speed_up.update(*v),
            NodeUpdate::SpeedDown(v) => self.metrics.speed_down.update(*v),
            NodeUpdate::Country(cc) => {
                // Sticky: only the first resolution after (re)birth counts
                if self.country.is_none() {
                    self.country = Some(*cc);
                }
            }
            NodeUpdate::SetStatus(flags) => self.status |= flags,
            NodeUpdate::ClearStatus(flags) => {
                self.status &= !flags;
                // A dead node gets its country resolved again once it revives
                if flags & STATUS_ALIVE != 0 {
                    self.country = None;
                }
            }
            NodeUpdate::Risk(v) => self.risk = *v,
            NodeUpdate::Checked(ts) => self.last_checked = *ts,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a valid record for tests with the given server and delay samples.
    pub fn record(server: &str, subscription_id: u16, delays: &[u16]) -> NodeRecord {
        let candidate = Candidate {
            kind: ProxyKind::Vless,
            name: server.to_string(),
            identity: Identity {
                server: server.to_string(),
                port: 443,
                uuid: Some("f6b6bd5e-1a1b-4c35-b1d4-22d8c2b5a0d9".to_string()),
                ..Default::default()
            },
            raw_config: server.as_bytes().to_vec(),
            subscription_id,
        };

        let mut rec = candidate.into_record().unwrap();
        for d in delays {
            rec.apply(&NodeUpdate::Delay(*d));
        }
        rec.apply(&NodeUpdate::SetStatus(STATUS_ALIVE));
        rec
    }

    #[test]
    fn invalid_candidate_is_discarded() {
        let candidate = Candidate {
            kind: ProxyKind::Shadowsocks,
            name: "broken".to_string(),
            identity: Identity::default(),
            raw_config: vec![],
            subscription_id: 1,
        };
        assert!(candidate.into_record().is_none());
    }

    #[test]
    fn fingerprint_stable_across_updates() {
        let mut rec = record("1.1.1.1", 1, &[120]);
        let fp = rec.fingerprint();
        rec.apply(&NodeUpdate::Delay(80));
        rec.apply(&NodeUpdate::SpeedDown(4000));
        assert_eq!(rec.fingerprint(), fp);
        assert_eq!(rec.avg_delay(), 100);
        assert_eq!(rec.avg_speed_down(), 4000);
        assert_eq!(rec.avg_speed_up(), 0);
    }

    #[test]
    fn country_is_sticky_until_death() {
        let mut rec = record("2.2.2.2", 1, &[50]);
        rec.apply(&NodeUpdate::Country("DE".parse().unwrap()));
        rec.apply(&NodeUpdate::Country("FR".parse().unwrap()));
        assert_eq!(rec.country.unwrap().as_str(), "DE");

        rec.apply(&NodeUpdate::SetStatus(STATUS_TIKTOK));
        assert!(rec.has_status(STATUS_ALIVE | STATUS_TIKTOK));

        rec.apply(&NodeUpdate::ClearStatus(STATUS_TIKTOK));
        assert_eq!(rec.country.unwrap().as_str(), "DE");

        rec.apply(&NodeUpdate::ClearStatus(STATUS_ALIVE));
        assert!(!rec.is_alive());
        assert!(rec.country.is_none());

        rec.apply(&NodeUpdate::Country("FR".parse().unwrap()));
        assert_eq!(rec.country.unwrap().as_str(), "FR");
    }
}
