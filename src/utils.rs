// src/utils.rs
use crate::types::{BusterError, Header};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

/// Random lowercase alphanumeric token, practically unique per call.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Parses `200,204,301-308` style lists. Ranges are inclusive.
pub fn parse_number_list<T>(input: &str) -> Result<BTreeSet<T>, BusterError>
where
    T: FromStr + Ord + Copy + Into<u64> + TryFrom<u64>,
{
    let mut set = BTreeSet::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let invalid = || BusterError::ConfigError(format!("invalid list entry: {:?}", part));

        if let Some((start, end)) = part.split_once('-') {
            let start: T = start.trim().parse().map_err(|_| invalid())?;
            let end: T = end.trim().parse().map_err(|_| invalid())?;
            let (start, end): (u64, u64) = (start.into(), end.into());
            if start > end {
                return Err(invalid());
            }
            for value in start..=end {
                set.insert(T::try_from(value).map_err(|_| invalid())?);
            }
        } else {
            set.insert(part.parse().map_err(|_| invalid())?);
        }
    }

    Ok(set)
}

pub fn parse_status_codes(input: &str) -> Result<BTreeSet<u16>, BusterError> {
    let codes = parse_number_list::<u16>(input)?;
    if let Some(code) = codes.iter().find(|c| !(100..=599).contains(*c)) {
        return Err(BusterError::ConfigError(format!(
            "invalid status code: {}",
            code
        )));
    }
    Ok(codes)
}

pub fn parse_lengths(input: &str) -> Result<BTreeSet<u64>, BusterError> {
    parse_number_list::<u64>(input)
}

/// Parses a `Name: value` header.
pub fn parse_header(raw: &str) -> Result<Header, BusterError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| BusterError::ConfigError(format!("invalid header {:?}", raw)))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(BusterError::ConfigError(format!("invalid header {:?}", raw)));
    }

    Ok(Header {
        name: name.to_string(),
        value: value.trim().to_string(),
    })
}

/// Parses `1500ms`, `2s` or `1m`. A bare number is taken as milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (value, unit) = input.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration {:?}", input))?;

    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => Err(format!("unknown duration unit {:?} in {:?}", other, input)),
    }
}

pub fn join_set<T: ToString>(set: &BTreeSet<T>) -> String {
    set.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Check if a string is a valid domain
pub fn is_valid_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.');
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    for part in domain.split('.') {
        if part.is_empty() || part.len() > 63 {
            return false;
        }

        if !part.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return false;
        }

        if part.starts_with('-') || part.ends_with('-') {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_domain() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("sub.example.com."));
        assert!(is_valid_domain("localhost"));
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("-example.com"));
        assert!(!is_valid_domain("example-.com"));
        assert!(!is_valid_domain("exa mple.com"));
    }

    #[test]
    fn test_parse_status_codes() {
        let codes = parse_status_codes("200, 301-303,404").unwrap();
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec![200, 301, 302, 303, 404]);
        assert!(parse_status_codes("").unwrap().is_empty());
        assert!(parse_status_codes("abc").is_err());
        assert!(parse_status_codes("700").is_err());
        assert!(parse_status_codes("300-200").is_err());
    }

    #[test]
    fn test_parse_lengths() {
        let lengths = parse_lengths("0,100-102").unwrap();
        assert_eq!(lengths.len(), 4);
        assert!(lengths.contains(&101));
    }

    #[test]
    fn test_parse_header() {
        let header = parse_header("X-Api-Key:  secret ").unwrap();
        assert_eq!(header.name, "X-Api-Key");
        assert_eq!(header.value, "secret");
        assert!(parse_header("no separator").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("3h").is_err());
    }

    #[test]
    fn test_random_token() {
        let token = random_token(32);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(token, random_token(32));
    }
}
