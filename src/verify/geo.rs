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

//! Country of egress lookup. Each strategy is a plain description of one
//! public lookup service: where to ask, which headers to send, and how to
//! pull a country code out of the response body.

use std::{collections::HashMap, time::Duration};

use log::debug;
use tinyjson::JsonValue;
use url::Url;

use super::client::{ProbeClient, ProbeRequest};
use crate::{
    node::CountryCode,
    system::{timeout::timeout, CancelToken},
};

/// Body to country code extraction
pub type Extractor = fn(&[u8]) -> Option<CountryCode>;

#[derive(Clone, Debug)]
pub struct GeoStrategy {
    pub name: &'static str,
    pub url: &'static str,
    pub headers: &'static [(&'static str, &'static str)],
    pub extract: Extractor,
}

/// Read a string member of a top-level JSON object as a country code.
fn json_field(body: &[u8], key: &str) -> Option<CountryCode> {
    let text = std::str::from_utf8(body).ok()?;
    let json: JsonValue = text.parse().ok()?;
    let map = json.get::<HashMap<String, JsonValue>>()?;
    map.get(key)?.get::<String>()?.parse().ok()
}

fn ipinfo(body: &[u8]) -> Option<CountryCode> {
    json_field(body, "country")
}

fn ip_api(body: &[u8]) -> Option<CountryCode> {
    json_field(body, "countryCode")
}

fn ip_sb(body: &[u8]) -> Option<CountryCode> {
    json_field(body, "country_code")
}

fn country_is(body: &[u8]) -> Option<CountryCode> {
    json_field(body, "country")
}

/// `key=value` lines, the country is under `loc`.
fn cloudflare_trace(body: &[u8]) -> Option<CountryCode> {
    let text = std::str::from_utf8(body).ok()?;
    text.lines().find_map(|line| line.strip_prefix("loc=")).and_then(|v| v.parse().ok())
}

/// Lookup services in the order they are tried
pub const DEFAULT_STRATEGIES: &[GeoStrategy] = &[
    GeoStrategy {
        name: "ipinfo",
        url: "https://ipinfo.io/json",
        headers: &[("Accept", "application/json")],
        extract: ipinfo,
    },
    GeoStrategy {
        name: "ip-api",
        url: "http://ip-api.com/json",
        headers: &[],
        extract: ip_api,
    },
    GeoStrategy {
        name: "ip.sb",
        url: "https://api.ip.sb/geoip",
        headers: &[("User-Agent", "Mozilla/5.0")],
        extract: ip_sb,
    },
    GeoStrategy {
        name: "cloudflare",
        url: "https://www.cloudflare.com/cdn-cgi/trace",
        headers: &[],
        extract: cloudflare_trace,
    },
    GeoStrategy {
        name: "country.is",
        url: "https://api.country.is/",
        headers: &[],
        extract: country_is,
    },
];

/// Ordered fallback over lookup strategies
#[derive(Clone, Debug)]
pub struct GeoResolver {
    strategies: Vec<GeoStrategy>,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(timeout: Duration) -> Self {
        Self::with_strategies(DEFAULT_STRATEGIES.to_vec(), timeout)
    }

    pub fn with_strategies(strategies: Vec<GeoStrategy>, timeout: Duration) -> Self {
        Self { strategies, timeout }
    }

    pub fn strategies(&self) -> &[GeoStrategy] {
        &self.strategies
    }

    /// Try every strategy in order through `client`. The first one that
    /// yields a country code wins. Each lookup gets the resolver timeout
    /// and no more. Stops early if `cancel` fires.
    pub async fn resolve<C: ProbeClient>(
        &self,
        client: &mut C,
        cancel: &CancelToken,
    ) -> Option<CountryCode> {
        for strategy in &self.strategies {
            let url = match Url::parse(strategy.url) {
                Ok(url) => url,
                Err(e) => {
                    debug!(target: "verify::geo::resolve()", "[{}] Bad URL: {}", strategy.name, e);
                    continue
                }
            };

            let mut req = ProbeRequest::get(url, self.timeout).body_limit(64 * 1024);
            for (name, value) in strategy.headers {
                req = req.header(name, value);
            }

            let resp = match cancel.run(timeout(self.timeout, client.send(&req))).await? {
                Ok(Ok(resp)) if (200..300).contains(&resp.status) => resp,
                Ok(Ok(resp)) => {
                    debug!(target: "verify::geo::resolve()", "[{}] Status {}", strategy.name, resp.status);
                    continue
                }
                Ok(Err(e)) => {
                    debug!(target: "verify::geo::resolve()", "[{}] Lookup failed: {}", strategy.name, e);
                    continue
                }
                Err(e) => {
                    debug!(target: "verify::geo::resolve()", "[{}] Lookup timed out: {}", strategy.name, e);
                    continue
                }
            };

            if let Some(country) = (strategy.extract)(&resp.body) {
                debug!(target: "verify::geo::resolve()", "[{}] Resolved {}", strategy.name, country);
                return Some(country)
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{verify::client::ProbeResponse, Error, Result};
    use async_trait::async_trait;

    #[test]
    fn extractors() {
        let de = Some("DE".parse::<CountryCode>().unwrap());

        assert_eq!(ipinfo(br#"{"ip":"1.2.3.4","country":"DE","org":"AS1"}"#), de);
        assert_eq!(ip_api(br#"{"status":"success","countryCode":"de"}"#), de);
        assert_eq!(ip_sb(br#"{"country_code":"DE","asn":3320}"#), de);
        assert_eq!(country_is(br#"{"ip":"1.2.3.4","country":"DE"}"#), de);
        assert_eq!(cloudflare_trace(b"fl=1\nip=1.2.3.4\nloc=DE\ntls=TLSv1.3\n"), de);

        assert_eq!(ipinfo(b"<html>rate limited</html>"), None);
        assert_eq!(ipinfo(br#"{"country":""}"#), None);
        assert_eq!(ipinfo(br#"{"country":42}"#), None);
        assert_eq!(ipinfo(br#"["DE"]"#), None);
        assert_eq!(cloudflare_trace(b"loc=XXX\n"), None);
    }

    /// Fails every host except the one named in `answer_host`.
    struct OneHost {
        answer_host: &'static str,
        body: &'static [u8],
        asked: Vec<String>,
    }

    #[async_trait]
    impl ProbeClient for OneHost {
        async fn send(&mut self, req: &ProbeRequest) -> Result<ProbeResponse> {
            let host = req.url.host_str().unwrap_or_default().to_string();
            self.asked.push(host.clone());
            if host == self.answer_host {
                return Ok(ProbeResponse { status: 200, body: self.body.to_vec() })
            }
            Err(Error::ProbeFailed(host))
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn falls_through_in_order() {
        smol::block_on(async {
            let resolver = GeoResolver::new(Duration::from_millis(100));
            let mut client = OneHost {
                answer_host: "api.ip.sb",
                body: br#"{"country_code":"JP"}"#,
                asked: vec![],
            };

            let country = resolver.resolve(&mut client, &CancelToken::new()).await;
            assert_eq!(country.unwrap().as_str(), "JP");
            assert_eq!(client.asked, vec!["ipinfo.io", "ip-api.com", "api.ip.sb"]);

            let mut nothing = OneHost { answer_host: "none", body: b"", asked: vec![] };
            assert!(resolver.resolve(&mut nothing, &CancelToken::new()).await.is_none());
            assert_eq!(nothing.asked.len(), DEFAULT_STRATEGIES.len());
        });
    }

    /// Stalls on the first host for `stall`, answers every other host.
    struct SlowFirst {
        stall: Duration,
        asked: Vec<String>,
    }

    #[async_trait]
    impl ProbeClient for SlowFirst {
        async fn send(&mut self, req: &ProbeRequest) -> Result<ProbeResponse> {
            let host = req.url.host_str().unwrap_or_default().to_string();
            self.asked.push(host);
            if self.asked.len() == 1 {
                smol::Timer::after(self.stall).await;
            }
            Ok(ProbeResponse { status: 200, body: br#"{"countryCode":"NL"}"#.to_vec() })
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn lookup_budget_is_the_resolver_timeout() {
        smol::block_on(async {
            let resolver = GeoResolver::new(Duration::from_millis(100));
            let mut client = SlowFirst { stall: Duration::from_millis(800), asked: vec![] };

            let start = std::time::Instant::now();
            let country = resolver.resolve(&mut client, &CancelToken::new()).await;

            assert_eq!(country.unwrap().as_str(), "NL");
            assert_eq!(client.asked, vec!["ipinfo.io", "ip-api.com"]);
            // The stalled lookup was abandoned at 100ms, well before it answered
            assert!(start.elapsed() < Duration::from_millis(700));
        });
    }
}
