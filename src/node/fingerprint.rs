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

//! Node fingerprints. A fingerprint is a 64-bit xxh3 hash over a node's
//! identity fields only, so it stays stable across metric updates.
//! A fingerprint of 0 marks an invalid node that must be discarded.

use xxhash_rust::xxh3::xxh3_64;

use super::{Identity, IdentityField, ProxyKind};

pub type Fingerprint = u64;

/// Reserved value for "no valid identity".
pub const INVALID_FINGERPRINT: Fingerprint = 0;

/// Hash the concatenation of `fields` in the given order.
/// Returns [`INVALID_FINGERPRINT`] if there is nothing to hash.
pub fn fingerprint<'a, I>(fields: I) -> Fingerprint
where
    I: IntoIterator<Item = &'a str>,
{
    let mut buf = Vec::with_capacity(128);
    for field in fields {
        buf.extend_from_slice(field.as_bytes());
    }

    if buf.is_empty() {
        return INVALID_FINGERPRINT
    }

    xxh3_64(&buf)
}

/// Fingerprint a node from the identity fields its protocol declares.
/// Server and port are mandatory; a node missing either is invalid.
pub fn node_fingerprint(kind: ProxyKind, identity: &Identity) -> Fingerprint {
    if identity.server.is_empty() || identity.port == 0 {
        return INVALID_FINGERPRINT
    }

    let port = identity.port.to_string();
    let fields = kind.identity_fields().iter().filter_map(|field| match field {
        IdentityField::Server => Some(identity.server.as_str()),
        IdentityField::Port => Some(port.as_str()),
        IdentityField::Username => identity.username.as_deref(),
        IdentityField::Password => identity.password.as_deref(),
        IdentityField::AuthStr => identity.auth_str.as_deref(),
        IdentityField::Uuid => identity.uuid.as_deref(),
        IdentityField::ServerName => identity.server_name.as_deref(),
    });

    fingerprint(fields.filter(|f| !f.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trojan(server: &str, password: &str) -> Identity {
        Identity {
            server: server.to_string(),
            port: 443,
            password: Some(password.to_string()),
            server_name: Some("example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_input_is_invalid() {
        assert_eq!(fingerprint(std::iter::empty()), INVALID_FINGERPRINT);
        assert_eq!(fingerprint(["", ""]), INVALID_FINGERPRINT);
        assert_ne!(fingerprint(["a"]), INVALID_FINGERPRINT);
    }

    #[test]
    fn order_sensitive_and_deterministic() {
        assert_eq!(fingerprint(["1.2.3.4", "443"]), fingerprint(["1.2.3.4", "443"]));
        assert_ne!(fingerprint(["a", "b"]), fingerprint(["b", "a"]));
    }

    #[test]
    fn node_fingerprint_uses_identity_only() {
        let a = trojan("1.2.3.4", "secret");
        let b = trojan("1.2.3.4", "secret");
        let c = trojan("1.2.3.4", "other");
        assert_eq!(node_fingerprint(ProxyKind::Trojan, &a), node_fingerprint(ProxyKind::Trojan, &b));
        assert_ne!(node_fingerprint(ProxyKind::Trojan, &a), node_fingerprint(ProxyKind::Trojan, &c));

        // Fields outside the protocol's identity list are ignored
        let mut d = a.clone();
        d.uuid = Some("ignored".to_string());
        assert_eq!(node_fingerprint(ProxyKind::Trojan, &a), node_fingerprint(ProxyKind::Trojan, &d));
    }

    #[test]
    fn missing_address_is_invalid() {
        let mut id = trojan("", "secret");
        assert_eq!(node_fingerprint(ProxyKind::Trojan, &id), INVALID_FINGERPRINT);
        id.server = "1.2.3.4".to_string();
        id.port = 0;
        assert_eq!(node_fingerprint(ProxyKind::Trojan, &id), INVALID_FINGERPRINT);
    }
}
