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

// Hello developer. Please add your error to the according subsection
// that is commented, or make a new subsection. Keep it clean.

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// General library errors used throughout the codebase.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ==============
    // Parsing errors
    // ==============
    #[error("Parse failed: {0}")]
    ParseFailed(&'static str),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    TomlDeserializeError(#[from] toml::de::Error),

    #[error("Invalid country code: {0}")]
    InvalidCountryCode(String),

    // ===========================
    // Probe and dial errors
    // ===========================
    #[error("Proxy dial failed: {0}")]
    DialFailed(String),

    #[error("Probe request failed: {0}")]
    ProbeFailed(String),

    #[error("Unexpected probe status: {0}")]
    UnexpectedStatus(u16),

    #[error("Timeout Error")]
    TimeoutError,

    #[error("Probe cancelled")]
    ProbeCancelled,

    // ============
    // Store errors
    // ============
    #[error("Node store inconsistency: {0}")]
    StoreInconsistency(String),

    // =============
    // System errors
    // =============
    #[error("IO error: {0:?}")]
    Io(std::io::ErrorKind),

    #[error(transparent)]
    BackwardsTime(#[from] std::time::SystemTimeError),

    #[error("Detached task stopped")]
    DetachedTaskStopped,

    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    // ==============================================
    // Catch-all (This is not allowed, use your own.)
    // ==============================================
    #[error("{0}")]
    Custom(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<crate::system::timeout::TimeoutError> for Error {
    fn from(_err: crate::system::timeout::TimeoutError) -> Self {
        Self::TimeoutError
    }
}
