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

//! Liveness facets of a node. Each bit is tracked independently; clearing
//! a bit never implies removal from the store.

pub type StatusFlag = u16;
pub const STATUS_ALIVE: StatusFlag = 0b001;
pub const STATUS_TIKTOK: StatusFlag = 0b010;
pub const STATUS_TIKTOK_IDC: StatusFlag = 0b100;

pub const STATUS_NONE: StatusFlag = 0b000;
pub const STATUS_ALL: StatusFlag = 0b111;

/// Returns true if every bit of `mask` is set in `flags`.
pub fn has_all(flags: StatusFlag, mask: StatusFlag) -> bool {
    flags & mask == mask
}
