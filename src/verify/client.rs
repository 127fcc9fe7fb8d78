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

//! Capabilities the verification pool needs from the outside world.
//!
//! A [`ProxyDialer`] knows how to route a [`ProbeClient`] through a node
//! given the node's raw configuration. Clients are expensive to build, so
//! they are kept in a [`ClientPool`] and handed out as [`ClientLease`]s
//! that reset and return the client when dropped.

use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use log::trace;
use url::Url;

use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeMethod {
    Get,
    /// POST with the given payload
    Post(Vec<u8>),
}

/// A single outbound HTTP request issued through a proxied client.
#[derive(Clone, Debug)]
pub struct ProbeRequest {
    pub url: Url,
    pub method: ProbeMethod,
    pub headers: Vec<(String, String)>,
    /// Clients stop reading the body once this elapses and return what
    /// they have read so far
    pub timeout: Duration,
    /// Clients stop reading the body after this many bytes
    pub body_limit: usize,
}

impl ProbeRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self { url, method: ProbeMethod::Get, headers: vec![], timeout, body_limit: 0 }
    }

    pub fn post(url: Url, payload: Vec<u8>, timeout: Duration) -> Self {
        Self { url, method: ProbeMethod::Post(payload), headers: vec![], timeout, body_limit: 0 }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// An HTTP client that can be routed through a proxy node.
#[async_trait]
pub trait ProbeClient: Send + 'static {
    async fn send(&mut self, req: &ProbeRequest) -> Result<ProbeResponse>;

    /// Drop any proxy route, timeouts and TLS state so the client can be
    /// reused for another node.
    fn reset(&mut self);
}

/// Ephemeral proxy dial capability.
#[async_trait]
pub trait ProxyDialer: Send + Sync + 'static {
    type Client: ProbeClient;

    /// Build a fresh, unrouted client.
    fn new_client(&self) -> Self::Client;

    /// Route `client` through the node described by `raw_config`.
    async fn dial(&self, client: &mut Self::Client, raw_config: &[u8]) -> Result<()>;
}

/// Pool of idle clients. At most `max_idle` are kept, extra returns are
/// dropped.
pub struct ClientPool<C> {
    idle: Mutex<Vec<C>>,
    max_idle: usize,
}

impl<C: ProbeClient> ClientPool<C> {
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self { idle: Mutex::new(Vec::with_capacity(max_idle)), max_idle })
    }

    /// Take an idle client, or build one with `make` if none is left.
    pub fn checkout(self: &Arc<Self>, make: impl FnOnce() -> C) -> ClientLease<C> {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let client = match reused {
            Some(c) => c,
            None => {
                trace!(target: "verify::client::checkout()", "No idle client, building one");
                make()
            }
        };

        ClientLease { client: Some(client), pool: self.clone() }
    }

    /// Number of idle clients
    pub fn idle(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn give_back(&self, mut client: C) {
        client.reset();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(client);
            }
        }
    }
}

/// Scoped checkout of a pooled client. Dropping the lease resets the
/// client and returns it to the pool.
pub struct ClientLease<C: ProbeClient> {
    client: Option<C>,
    pool: Arc<ClientPool<C>>,
}

impl<C: ProbeClient> Deref for ClientLease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only taken in drop()
        self.client.as_ref().unwrap()
    }
}

impl<C: ProbeClient> DerefMut for ClientLease<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.client.as_mut().unwrap()
    }
}

impl<C: ProbeClient> Drop for ClientLease<C> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.give_back(client);
        }
    }
}
