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

//! Individual probes run against a routed client: reachability and
//! throughput in both directions.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use log::debug;

use super::client::{ProbeClient, ProbeRequest, ProbeResponse};
use crate::{settings::Settings, system::timeout::timeout, util::time::as_millis_saturating, Error, Result};

/// Extra time granted on top of a request's own timeout before the probe
/// is abandoned, for clients that return a partial body at the deadline.
const BODY_GRACE: Duration = Duration::from_secs(1);

/// Issue `req` on `client`, bounded by the request timeout plus some grace.
/// Returns the response and the wall time it took.
pub async fn send_bounded<C: ProbeClient>(
    client: &mut C,
    req: &ProbeRequest,
) -> Result<(ProbeResponse, Duration)> {
    let start = Instant::now();
    let resp = timeout(req.timeout + BODY_GRACE, client.send(req)).await??;
    Ok((resp, start.elapsed()))
}

/// Clamp a measured round trip into a delay sample. Samples never equal the
/// "no data" value of the delay metric.
pub fn delay_sample(elapsed: Duration) -> u16 {
    let ms = as_millis_saturating(elapsed).clamp(1, u64::from(u16::MAX - 1));
    ms as u16
}

/// Throughput in bytes per millisecond. Any transfer counts as at least 1.
pub fn bytes_per_ms(bytes: usize, elapsed: Duration) -> u32 {
    if bytes == 0 {
        return 0
    }

    let ms = as_millis_saturating(elapsed).max(1);
    let rate = (bytes as u64 / ms).max(1);
    u32::try_from(rate).unwrap_or(u32::MAX)
}

/// Reachability probe. Returns the delay sample on success.
pub async fn check_alive<C: ProbeClient>(
    client: &mut C,
    settings: &Settings,
    per_node: Duration,
) -> Result<u16> {
    let req = ProbeRequest::get(settings.probe_url.clone(), per_node);

    let start = Instant::now();
    let resp = timeout(per_node, client.send(&req)).await??;
    let elapsed = start.elapsed();

    if resp.status != settings.probe_expected_status {
        return Err(Error::UnexpectedStatus(resp.status))
    }

    Ok(delay_sample(elapsed))
}

/// Download probe. Reads up to the configured limit within the time budget.
pub async fn check_speed_down<C: ProbeClient>(client: &mut C, settings: &Settings) -> Result<u32> {
    let req = ProbeRequest::get(
        settings.speed_down_url.clone(),
        Duration::from_millis(settings.speed_timeout),
    )
    .body_limit(settings.speed_down_limit);

    let (resp, elapsed) = send_bounded(client, &req).await?;
    if !(200..300).contains(&resp.status) {
        return Err(Error::UnexpectedStatus(resp.status))
    }

    let bytes = resp.body.len().min(settings.speed_down_limit);
    Ok(bytes_per_ms(bytes, elapsed))
}

/// Upload probe. Posts the configured payload size.
pub async fn check_speed_up<C: ProbeClient>(client: &mut C, settings: &Settings) -> Result<u32> {
    let payload = vec![0u8; settings.speed_up_size];
    let req = ProbeRequest::post(
        settings.speed_up_url.clone(),
        payload,
        Duration::from_millis(settings.speed_timeout),
    )
    .header("Content-Type", "application/octet-stream");

    let (resp, elapsed) = send_bounded(client, &req).await?;
    if !(200..300).contains(&resp.status) {
        return Err(Error::UnexpectedStatus(resp.status))
    }

    Ok(bytes_per_ms(settings.speed_up_size, elapsed))
}

/// Shared across the tasks of one run. Closes once `target` nodes have
/// reached `threshold`, so a run stops spending bandwidth on speed probes.
pub struct SpeedGate {
    met: AtomicUsize,
    target: usize,
    threshold: u32,
}

impl SpeedGate {
    /// A `target` of 0 never closes.
    pub fn new(target: usize, threshold: u32) -> Self {
        Self { met: AtomicUsize::new(0), target, threshold }
    }

    pub fn is_open(&self) -> bool {
        self.target == 0 || self.met.load(Ordering::Acquire) < self.target
    }

    /// Count a measurement. Returns true if it met the threshold.
    pub fn record(&self, rate: u32) -> bool {
        if rate < self.threshold {
            return false
        }

        let met = self.met.fetch_add(1, Ordering::AcqRel) + 1;
        if self.target != 0 && met == self.target {
            debug!(target: "verify::probe::SpeedGate", "Speed target of {} nodes reached", self.target);
        }
        true
    }

    pub fn met(&self) -> usize {
        self.met.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed {
        status: u16,
        body: usize,
        wait: Duration,
    }

    #[async_trait]
    impl ProbeClient for Fixed {
        async fn send(&mut self, _req: &ProbeRequest) -> Result<ProbeResponse> {
            smol::Timer::after(self.wait).await;
            Ok(ProbeResponse { status: self.status, body: vec![1; self.body] })
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn samples_are_clamped() {
        assert_eq!(delay_sample(Duration::ZERO), 1);
        assert_eq!(delay_sample(Duration::from_millis(250)), 250);
        assert_eq!(delay_sample(Duration::from_secs(3600)), u16::MAX - 1);

        assert_eq!(bytes_per_ms(0, Duration::from_millis(10)), 0);
        assert_eq!(bytes_per_ms(10, Duration::from_millis(100)), 1);
        assert_eq!(bytes_per_ms(50_000, Duration::from_millis(10)), 5000);
        assert_eq!(bytes_per_ms(50_000, Duration::ZERO), 50_000);
    }

    #[test]
    fn alive_requires_expected_status() {
        smol::block_on(async {
            let settings = Settings::default();
            let per_node = Duration::from_millis(200);

            let mut ok = Fixed { status: 204, body: 0, wait: Duration::ZERO };
            assert!(check_alive(&mut ok, &settings, per_node).await.unwrap() >= 1);

            let mut wrong = Fixed { status: 200, body: 0, wait: Duration::ZERO };
            assert!(matches!(
                check_alive(&mut wrong, &settings, per_node).await,
                Err(Error::UnexpectedStatus(200))
            ));

            let mut slow = Fixed { status: 204, body: 0, wait: Duration::from_secs(5) };
            assert!(matches!(
                check_alive(&mut slow, &settings, per_node).await,
                Err(Error::TimeoutError)
            ));
        });
    }

    #[test]
    fn download_is_capped_by_limit() {
        smol::block_on(async {
            let settings = Settings { speed_down_limit: 1000, ..Default::default() };
            let mut client = Fixed { status: 200, body: 5000, wait: Duration::ZERO };
            // At most 1000 bytes over at least 1ms
            assert!(check_speed_down(&mut client, &settings).await.unwrap() <= 1000);
        });
    }

    #[test]
    fn gate_closes_at_target() {
        let gate = SpeedGate::new(2, 100);
        assert!(gate.is_open());
        assert!(!gate.record(50));
        assert!(gate.record(100));
        assert!(gate.is_open());
        assert!(gate.record(900));
        assert!(!gate.is_open());
        assert_eq!(gate.met(), 2);

        let unbounded = SpeedGate::new(0, 1);
        unbounded.record(10);
        assert!(unbounded.is_open());
    }
}
