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

use std::time::Duration;

use log::debug;

use super::{
    client::{ProbeClient, ProbeRequest},
    probe::send_bounded,
};
use crate::{
    node::{status::STATUS_NONE, NodeUpdate, StatusFlag, STATUS_TIKTOK, STATUS_TIKTOK_IDC},
    settings::Settings,
    Result,
};

/// Markers served in place of the regular page to unsupported regions
const REGION_BLOCK_MARKERS: &[&str] =
    &["not available in your region", "Access Denied", "unavailable in your country"];

/// The region endpoint only answers with this member for datacenter egress
/// it treats as a regular client
const IDC_MARKER: &str = "\"store_region\"";

/// Outcome of the two-step capability check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capability {
    Unsupported,
    Standard,
    Datacenter,
}

impl Capability {
    pub fn status(self) -> StatusFlag {
        match self {
            Self::Unsupported => STATUS_NONE,
            Self::Standard => STATUS_TIKTOK,
            Self::Datacenter => STATUS_TIKTOK | STATUS_TIKTOK_IDC,
        }
    }

    /// Updates setting the bits this outcome grants and clearing the rest
    pub fn updates(self) -> Vec<NodeUpdate> {
        let granted = self.status();
        let revoked = (STATUS_TIKTOK | STATUS_TIKTOK_IDC) & !granted;

        let mut updates = vec![];
        if granted != 0 {
            updates.push(NodeUpdate::SetStatus(granted));
        }
        if revoked != 0 {
            updates.push(NodeUpdate::ClearStatus(revoked));
        }
        updates
    }
}

pub fn region_blocked(status: u16, body: &[u8]) -> bool {
    if !(200..400).contains(&status) {
        return true
    }

    let text = String::from_utf8_lossy(body);
    REGION_BLOCK_MARKERS.iter().any(|m| text.contains(m))
}

pub fn datacenter_capable(status: u16, body: &[u8]) -> bool {
    status == 200 && String::from_utf8_lossy(body).contains(IDC_MARKER)
}

/// Run both probes. A failed second probe still leaves the node standard.
pub async fn check<C: ProbeClient>(client: &mut C, settings: &Settings) -> Result<Capability> {
    let budget = Duration::from_millis(settings.probe_timeout);

    let req = ProbeRequest::get(settings.capability_url.clone(), budget).body_limit(256 * 1024);
    let (resp, _) = send_bounded(client, &req).await?;
    if region_blocked(resp.status, &resp.body) {
        return Ok(Capability::Unsupported)
    }

    let req = ProbeRequest::get(settings.capability_idc_url.clone(), budget).body_limit(16 * 1024);
    match send_bounded(client, &req).await {
        Ok((resp, _)) if datacenter_capable(resp.status, &resp.body) => Ok(Capability::Datacenter),
        Ok(_) => Ok(Capability::Standard),
        Err(e) => {
            debug!(target: "verify::capability::check()", "Second probe failed: {}", e);
            Ok(Capability::Standard)
        }
    }
}
