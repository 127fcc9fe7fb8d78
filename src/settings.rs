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

use log::debug;
use structopt::StructOpt;
use url::Url;

use crate::{Error, Result};

/// Atomic pointer to pool settings
pub type SettingsPtr = Arc<Settings>;

/// Tunables of the node store and the verification pool. Constructed by
/// the library user, usually from [`SettingsOpt`] or [`Settings::from_toml`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum number of records held by the store
    pub store_capacity: usize,
    /// Global ceiling on concurrently running probes
    pub max_workers: usize,
    /// Reachability probe endpoint
    pub probe_url: Url,
    /// Status code the reachability probe must answer with
    pub probe_expected_status: u16,
    /// Per-node timeout when the run options don't name one (in milliseconds)
    pub probe_timeout: u64,
    /// Download speed endpoint
    pub speed_down_url: Url,
    /// Upload speed endpoint, receives a POST
    pub speed_up_url: Url,
    /// Maximum number of bytes read from the download endpoint
    pub speed_down_limit: usize,
    /// Payload size posted to the upload endpoint
    pub speed_up_size: usize,
    /// Time budget of a single speed probe (in milliseconds)
    pub speed_timeout: u64,
    /// A node meeting this speed (bytes/ms) counts towards the target
    pub speed_threshold: u32,
    /// Stop speed probing once this many nodes met the threshold, 0 for never
    pub speed_target_count: usize,
    /// Timeout of each geo lookup strategy (in milliseconds)
    pub geo_timeout: u64,
    /// First capability endpoint, tells unsupported regions apart
    pub capability_url: Url,
    /// Second capability endpoint, tells datacenter egress apart
    pub capability_idc_url: Url,
    /// Records slower than this are dropped by maintenance, 0 to disable
    pub janitor_max_delay: u16,
    /// Pause between maintenance sweeps (in seconds)
    pub janitor_interval: u64,
    /// Completions arriving within this window share one merge (in milliseconds)
    pub merge_debounce: u64,
    /// Idle probe clients kept for reuse
    pub client_pool_idle: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_capacity: 1000,
            max_workers: 64,
            probe_url: Url::parse("https://www.gstatic.com/generate_204").unwrap(),
            probe_expected_status: 204,
            probe_timeout: 5000,
            speed_down_url: Url::parse("https://speed.cloudflare.com/__down?bytes=10000000")
                .unwrap(),
            speed_up_url: Url::parse("https://speed.cloudflare.com/__up").unwrap(),
            speed_down_limit: 10_000_000,
            speed_up_size: 1_000_000,
            speed_timeout: 10_000,
            speed_threshold: 1000,
            speed_target_count: 0,
            geo_timeout: 5000,
            capability_url: Url::parse("https://www.tiktok.com/").unwrap(),
            capability_idc_url: Url::parse("https://www.tiktok.com/passport/web/store_region/")
                .unwrap(),
            janitor_max_delay: 3000,
            janitor_interval: 600,
            merge_debounce: 500,
            client_pool_idle: 16,
        }
    }
}

impl Settings {
    /// Parse a TOML document. Keys absent from it keep their defaults.
    pub fn from_toml(doc: &str) -> Result<Self> {
        let opt: SettingsOpt = toml::from_str(doc)?;
        let settings = Self::from(opt);
        settings.validate()?;
        debug!(target: "settings::from_toml()", "Loaded {:?}", settings);
        Ok(settings)
    }

    /// Reject values the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store_capacity == 0 {
            return Err(Error::ConfigInvalid("store_capacity must be non-zero".to_string()))
        }

        if self.max_workers == 0 {
            return Err(Error::ConfigInvalid("max_workers must be non-zero".to_string()))
        }

        if self.janitor_max_delay != 0 && self.janitor_interval == 0 {
            return Err(Error::ConfigInvalid("janitor_interval must be non-zero".to_string()))
        }

        Ok(())
    }
}

/// Defines the node pool settings.
#[derive(Clone, Debug, serde::Deserialize, structopt::StructOpt, structopt_toml::StructOptToml)]
#[structopt()]
pub struct SettingsOpt {
    /// Maximum number of records held by the store
    #[structopt(long)]
    pub store_capacity: Option<usize>,

    /// Global ceiling on concurrently running probes
    #[structopt(long)]
    pub max_workers: Option<usize>,

    /// Reachability probe endpoint
    #[structopt(long)]
    pub probe_url: Option<Url>,

    /// Status code the reachability probe must answer with
    #[structopt(long)]
    pub probe_expected_status: Option<u16>,

    /// Default per-node timeout (in milliseconds)
    #[structopt(long)]
    pub probe_timeout: Option<u64>,

    /// Download speed endpoint
    #[structopt(long)]
    pub speed_down_url: Option<Url>,

    /// Upload speed endpoint
    #[structopt(long)]
    pub speed_up_url: Option<Url>,

    /// Maximum number of bytes read from the download endpoint
    #[structopt(long)]
    pub speed_down_limit: Option<usize>,

    /// Payload size posted to the upload endpoint
    #[structopt(long)]
    pub speed_up_size: Option<usize>,

    /// Time budget of a single speed probe (in milliseconds)
    #[structopt(long)]
    pub speed_timeout: Option<u64>,

    /// Speed (bytes/ms) that counts a node towards the target
    #[structopt(long)]
    pub speed_threshold: Option<u32>,

    /// Stop speed probing after this many fast nodes, 0 for never
    #[structopt(long)]
    pub speed_target_count: Option<usize>,

    /// Timeout of each geo lookup strategy (in milliseconds)
    #[structopt(long)]
    pub geo_timeout: Option<u64>,

    /// First capability endpoint
    #[structopt(long)]
    pub capability_url: Option<Url>,

    /// Second capability endpoint
    #[structopt(long)]
    pub capability_idc_url: Option<Url>,

    /// Maintenance delay ceiling, 0 to disable
    #[structopt(long)]
    pub janitor_max_delay: Option<u16>,

    /// Pause between maintenance sweeps (in seconds)
    #[structopt(long)]
    pub janitor_interval: Option<u64>,

    /// Merge debounce window (in milliseconds)
    #[structopt(long)]
    pub merge_debounce: Option<u64>,

    /// Idle probe clients kept for reuse
    #[structopt(long)]
    pub client_pool_idle: Option<usize>,
}

impl From<SettingsOpt> for Settings {
    fn from(opt: SettingsOpt) -> Self {
        let def = Settings::default();

        Self {
            store_capacity: opt.store_capacity.unwrap_or(def.store_capacity),
            max_workers: opt.max_workers.unwrap_or(def.max_workers),
            probe_url: opt.probe_url.unwrap_or(def.probe_url),
            probe_expected_status: opt.probe_expected_status.unwrap_or(def.probe_expected_status),
            probe_timeout: opt.probe_timeout.unwrap_or(def.probe_timeout),
            speed_down_url: opt.speed_down_url.unwrap_or(def.speed_down_url),
            speed_up_url: opt.speed_up_url.unwrap_or(def.speed_up_url),
            speed_down_limit: opt.speed_down_limit.unwrap_or(def.speed_down_limit),
            speed_up_size: opt.speed_up_size.unwrap_or(def.speed_up_size),
            speed_timeout: opt.speed_timeout.unwrap_or(def.speed_timeout),
            speed_threshold: opt.speed_threshold.unwrap_or(def.speed_threshold),
            speed_target_count: opt.speed_target_count.unwrap_or(def.speed_target_count),
            geo_timeout: opt.geo_timeout.unwrap_or(def.geo_timeout),
            capability_url: opt.capability_url.unwrap_or(def.capability_url),
            capability_idc_url: opt.capability_idc_url.unwrap_or(def.capability_idc_url),
            janitor_max_delay: opt.janitor_max_delay.unwrap_or(def.janitor_max_delay),
            janitor_interval: opt.janitor_interval.unwrap_or(def.janitor_interval),
            merge_debounce: opt.merge_debounce.unwrap_or(def.merge_debounce),
            client_pool_idle: opt.client_pool_idle.unwrap_or(def.client_pool_idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_named_keys() {
        let settings = Settings::from_toml(
            r#"
            store_capacity = 50
            probe_url = "http://127.0.0.1:8080/ping"
            janitor_max_delay = 0
            "#,
        )
        .unwrap();

        let def = Settings::default();
        assert_eq!(settings.store_capacity, 50);
        assert_eq!(settings.probe_url.as_str(), "http://127.0.0.1:8080/ping");
        assert_eq!(settings.janitor_max_delay, 0);
        assert_eq!(settings.max_workers, def.max_workers);
        assert_eq!(settings.speed_up_url, def.speed_up_url);
    }

    #[test]
    fn invalid_documents_are_rejected() {
        assert!(matches!(Settings::from_toml("max_workers = 0"), Err(Error::ConfigInvalid(_))));
        assert!(matches!(
            Settings::from_toml("probe_url = \"not a url\""),
            Err(Error::TomlDeserializeError(_))
        ));
        assert!(Settings::from_toml("store_capacity = -3").is_err());
    }
}
