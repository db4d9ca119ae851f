//! Dotted numeric firmware versions
//!
//! HAA firmware reports versions like `12.14.0`. Versions of unequal length
//! compare as if the shorter one were padded with trailing zeros, so
//! `12.1` and `12.1.0` are equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Malformed version string: {0:?}")]
    MalformedVersion(String),
}

/// Parsed firmware version
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

impl Version {
    /// Parse a dot-separated version string
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::MalformedVersion(s.to_string()));
        }

        let segments = s
            .split('.')
            .map(|segment| {
                if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VersionError::MalformedVersion(s.to_string()));
                }
                segment
                    .parse::<u64>()
                    .map_err(|_| VersionError::MalformedVersion(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }
}

/// Compare two version strings, failing if either is malformed
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality has to agree with the zero-padded ordering, so it can't be derived.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v = Version::parse("12.14.0").unwrap();
        assert_eq!(v.segments(), &[12, 14, 0]);
        assert_eq!(v.to_string(), "12.14.0");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("12.x.0").is_err());
        assert!(Version::parse("12..0").is_err());
        assert!(Version::parse("v12.0").is_err());
        assert!(Version::parse("12.-1").is_err());
    }

    #[test]
    fn test_compare_numeric_not_lexical() {
        assert_eq!(compare("2.3.1", "10.1.1").unwrap(), Ordering::Less);
        assert_eq!(compare("12.14.5", "12.14.0").unwrap(), Ordering::Greater);
        assert_eq!(compare("12.14.0", "12.14.0").unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_unequal_length_is_zero_padded() {
        assert_eq!(compare("12.1", "12.1.0").unwrap(), Ordering::Equal);
        assert_eq!(compare("12.1", "12.1.1").unwrap(), Ordering::Less);
        assert_eq!(compare("12.2", "12.1.9").unwrap(), Ordering::Greater);
        assert_eq!(Version::parse("12").unwrap(), Version::parse("12.0.0").unwrap());
    }

    #[test]
    fn test_order_is_total_and_transitive() {
        let mut versions: Vec<Version> = ["12.10.0", "1.0", "12.14.5", "12.9", "12.14"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(sorted, vec!["1.0", "12.9", "12.10.0", "12.14", "12.14.5"]);

        for a in &versions {
            assert_eq!(a.cmp(a), Ordering::Equal);
            for b in &versions {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
            }
        }
    }

    #[test]
    fn test_compare_propagates_malformed() {
        assert_eq!(
            compare("12.1", "abc"),
            Err(VersionError::MalformedVersion("abc".to_string()))
        );
    }
}
