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

use std::{fmt, str::FromStr};

use crate::{Error, Result};

/// Fields that identify a proxy node, in the fixed order they are fed
/// to the fingerprint hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityField {
    Server,
    Port,
    Username,
    Password,
    AuthStr,
    Uuid,
    ServerName,
}

use IdentityField::*;

/// Supported proxy protocols. Each variant knows which identity fields
/// make up its fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Shadowsocks,
    ShadowsocksR,
    Vmess,
    Vless,
    Trojan,
    Hysteria,
    Hysteria2,
    Tuic,
    Socks5,
    Http,
    AnyTls,
}

impl ProxyKind {
    pub const ALL: [ProxyKind; 11] = [
        Self::Shadowsocks,
        Self::ShadowsocksR,
        Self::Vmess,
        Self::Vless,
        Self::Trojan,
        Self::Hysteria,
        Self::Hysteria2,
        Self::Tuic,
        Self::Socks5,
        Self::Http,
        Self::AnyTls,
    ];

    /// Ordered identity fields for this protocol.
    pub const fn identity_fields(&self) -> &'static [IdentityField] {
        match self {
            Self::Shadowsocks | Self::ShadowsocksR => &[Server, Port, Password],
            Self::Vmess | Self::Vless => &[Server, Port, Uuid, ServerName],
            Self::Trojan | Self::Hysteria2 | Self::AnyTls => &[Server, Port, Password, ServerName],
            Self::Hysteria => &[Server, Port, AuthStr, ServerName],
            Self::Tuic => &[Server, Port, Password, Uuid, ServerName],
            Self::Socks5 | Self::Http => &[Server, Port, Username, Password],
        }
    }

    /// Protocol name as used in subscription documents.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Shadowsocks => "ss",
            Self::ShadowsocksR => "ssr",
            Self::Vmess => "vmess",
            Self::Vless => "vless",
            Self::Trojan => "trojan",
            Self::Hysteria => "hysteria",
            Self::Hysteria2 => "hysteria2",
            Self::Tuic => "tuic",
            Self::Socks5 => "socks5",
            Self::Http => "http",
            Self::AnyTls => "anytls",
        }
    }
}

impl FromStr for ProxyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.to_ascii_lowercase();
        match s.as_str() {
            "shadowsocks" => return Ok(Self::Shadowsocks),
            "shadowsocksr" => return Ok(Self::ShadowsocksR),
            "hy2" => return Ok(Self::Hysteria2),
            "socks" => return Ok(Self::Socks5),
            _ => {}
        }

        Self::ALL
            .iter()
            .find(|kind| kind.name() == s)
            .copied()
            .ok_or(Error::ParseFailed("Unknown proxy kind"))
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
