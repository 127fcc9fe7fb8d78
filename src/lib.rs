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

//! Bounded, deduplicated store of proxy nodes fed by a concurrent
//! verification pipeline.
//!
//! Candidates produced by a subscription parser are turned into
//! [`node::NodeRecord`]s, probed by [`verify::VerificationPool`] and
//! merged into a capacity-bounded [`store::NodeStore`] that keeps the
//! fastest nodes it has seen.

pub mod error;
pub use error::{Error, Result};

/// Node identity, metrics and status
pub mod node;

/// Tunables of the store and the verification pool
pub mod settings;

/// The node store and its indices
pub mod store;

/// Async runtime helpers
pub mod system;

/// Miscellaneous helpers
pub mod util;

/// Verification pool and probes
pub mod verify;
