//! Status codes treated as success.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Set of HTTP status codes that classify as success.
///
/// Parsed from and displayed as a comma separated list of codes and
/// inclusive ranges, e.g. `200-299,304`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcceptableStatusSet {
    codes: BTreeSet<u16>,
}

impl AcceptableStatusSet {
    pub fn from_range(range: RangeInclusive<u16>) -> Self {
        range.collect()
    }

    pub fn contains(&self, code: u16) -> bool {
        self.codes.contains(&code)
    }

    pub fn insert(&mut self, code: u16) -> bool {
        self.codes.insert(code)
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.codes.iter().copied()
    }
}

impl Default for AcceptableStatusSet {
    fn default() -> Self {
        Self::from_range(200..=299)
    }
}

impl FromIterator<u16> for AcceptableStatusSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self {
            codes: iter.into_iter().collect(),
        }
    }
}

impl FromStr for AcceptableStatusSet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut codes = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_code(start)?;
                    let end = parse_code(end)?;
                    if start > end {
                        anyhow::bail!("Invalid status range: {}", part);
                    }
                    codes.extend(start..=end);
                }
                None => {
                    codes.insert(parse_code(part)?);
                }
            }
        }
        if codes.is_empty() {
            anyhow::bail!("Status code set must not be empty");
        }
        Ok(Self { codes })
    }
}

fn parse_code(s: &str) -> anyhow::Result<u16> {
    let code: u16 = s
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid status code: {}", s))?;
    if !(100..=999).contains(&code) {
        anyhow::bail!("Status code out of range: {}", code);
    }
    Ok(code)
}

impl fmt::Display for AcceptableStatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let mut iter = self.codes.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{}-{}", start, end));
            }
        }
        f.write_str(&parts.join(","))
    }
}

impl TryFrom<String> for AcceptableStatusSet {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AcceptableStatusSet> for String {
    fn from(value: AcceptableStatusSet) -> Self {
        value.to_string()
    }
}

/// Standard reason phrase for a status code.
pub fn reason_phrase(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_2xx() {
        let set = AcceptableStatusSet::default();
        assert!(set.contains(200));
        assert!(set.contains(299));
        assert!(!set.contains(199));
        assert!(!set.contains(300));
        assert!(!set.contains(404));
    }

    #[test]
    fn test_parse_ranges_and_codes() {
        let set: AcceptableStatusSet = "200-204, 304".parse().unwrap();
        assert!(set.contains(204));
        assert!(set.contains(304));
        assert!(!set.contains(205));
        assert_eq!(set.to_string(), "200-204,304");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<AcceptableStatusSet>().is_err());
        assert!("abc".parse::<AcceptableStatusSet>().is_err());
        assert!("300-200".parse::<AcceptableStatusSet>().is_err());
        assert!("42".parse::<AcceptableStatusSet>().is_err());
    }

    #[test]
    fn test_display_default() {
        assert_eq!(AcceptableStatusSet::default().to_string(), "200-299");
    }

    #[test]
    fn test_serde_as_string() {
        let set: AcceptableStatusSet = [200, 201, 202, 404].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#""200-202,404""#);
        let parsed: AcceptableStatusSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(503), "Service Unavailable");
        assert_eq!(reason_phrase(799), "Unknown Status");
    }
}
