//! Embedded PostgreSQL version values.
//!
//! Versions are read from the live data directory (`PG_VERSION`) or from
//! the binaries bundled in an image, so parsing must reject anything that
//! is not a plain `major[.minor]` string rather than guess.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("empty database version string")]
    Empty,
    #[error("invalid database version: {0:?}")]
    Invalid(String),
}

/// Major (and, for pre-10 releases, minor) database version.
///
/// Ordering compares the major first, so `9.6 < 10 < 16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DbVersion {
    pub major: u32,
    pub minor: Option<u32>,
}

impl DbVersion {
    pub const fn new(major: u32) -> Self {
        Self { major, minor: None }
    }

    pub const fn with_minor(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor: Some(minor),
        }
    }
}

impl FromStr for DbVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let parse_part = |part: &str| -> Result<u32, VersionError> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::Invalid(trimmed.to_string()));
            }
            part.parse::<u32>()
                .map_err(|_| VersionError::Invalid(trimmed.to_string()))
        };

        match trimmed.split_once('.') {
            Some((major, minor)) => Ok(Self {
                major: parse_part(major)?,
                minor: Some(parse_part(minor)?),
            }),
            None => Ok(Self::new(parse_part(trimmed)?)),
        }
    }
}

impl fmt::Display for DbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{}.{}", self.major, minor),
            None => write!(f, "{}", self.major),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_only() {
        assert_eq!("16".parse::<DbVersion>().unwrap(), DbVersion::new(16));
        assert_eq!(" 14\n".parse::<DbVersion>().unwrap(), DbVersion::new(14));
    }

    #[test]
    fn parses_major_minor() {
        assert_eq!(
            "9.6".parse::<DbVersion>().unwrap(),
            DbVersion::with_minor(9, 6)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("".parse::<DbVersion>(), Err(VersionError::Empty));
        assert!(matches!(
            "sixteen".parse::<DbVersion>(),
            Err(VersionError::Invalid(_))
        ));
        assert!(matches!(
            "16.".parse::<DbVersion>(),
            Err(VersionError::Invalid(_))
        ));
        assert!(matches!(
            "-1".parse::<DbVersion>(),
            Err(VersionError::Invalid(_))
        ));
        assert!(matches!(
            "1.2.3".parse::<DbVersion>(),
            Err(VersionError::Invalid(_))
        ));
    }

    #[test]
    fn orders_numerically() {
        let old: DbVersion = "9.6".parse().unwrap();
        let mid: DbVersion = "10".parse().unwrap();
        let new: DbVersion = "16".parse().unwrap();
        assert!(old < mid);
        assert!(mid < new);
        assert!(DbVersion::new(14) < DbVersion::new(16));
    }

    #[test]
    fn displays_like_input() {
        assert_eq!(DbVersion::new(16).to_string(), "16");
        assert_eq!(DbVersion::with_minor(9, 6).to_string(), "9.6");
    }
}
