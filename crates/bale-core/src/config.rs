use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bale_domain::DigestAlgorithm;
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

pub const ENV_STORAGE_PATH: &str = "STORAGE_PATH";
pub const ENV_STORAGE_ADDRESS: &str = "STORAGE_ADDRESS";
pub const ENV_STORAGE_ADV_ADDR: &str = "STORAGE_ADV_ADDR";

pub const DEFAULT_STORAGE_PATH: &str = "/data";
pub const DEFAULT_STORAGE_ADDRESS: &str = ":9090";
pub const DEFAULT_ARTIFACT_RETENTION_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_ARTIFACT_RETENTION_RECORDS: usize = 2;

/// Settings for the artifact storage, typically bound from CLI flags and the
/// environment once at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageOptions {
    /// Directory where artifacts are stored. Must already exist.
    pub storage_path: PathBuf,
    /// `host:port` the file server binds to.
    pub storage_address: String,
    /// Address advertised to clients; derived from `storage_address` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_adv_address: Option<String>,
    /// Age after which artifacts become eligible for garbage collection.
    pub artifact_retention_ttl: Duration,
    /// Number of most recent artifacts kept regardless of age.
    pub artifact_retention_records: usize,
    pub artifact_digest_algo: DigestAlgorithm,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            storage_address: DEFAULT_STORAGE_ADDRESS.to_string(),
            storage_adv_address: None,
            artifact_retention_ttl: DEFAULT_ARTIFACT_RETENTION_TTL,
            artifact_retention_records: DEFAULT_ARTIFACT_RETENTION_RECORDS,
            artifact_digest_algo: DigestAlgorithm::default(),
        }
    }
}

impl StorageOptions {
    /// Defaults overlaid with `STORAGE_PATH`, `STORAGE_ADDRESS` and `STORAGE_ADV_ADDR`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(path) = env_non_empty(ENV_STORAGE_PATH) {
            options.storage_path = PathBuf::from(path);
        }
        if let Some(address) = env_non_empty(ENV_STORAGE_ADDRESS) {
            options.storage_address = address;
        }
        options.storage_adv_address = env_non_empty(ENV_STORAGE_ADV_ADDR);
        options
    }

    /// The address the file server advertises to clients.
    ///
    /// An explicit advertised address wins. Otherwise the bind address is used, with an
    /// empty host replaced by `localhost` and `0.0.0.0` replaced by the machine hostname.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidAddress`] when the bind address is not `host:port`
    /// or the hostname cannot be determined.
    pub fn advertised_address(&self) -> Result<String, StorageError> {
        if let Some(address) = self.storage_adv_address.as_deref().filter(|a| !a.is_empty()) {
            return Ok(address.to_string());
        }
        let (host, port) = split_host_port(&self.storage_address)?;
        let host = match host.as_str() {
            "" => "localhost".to_string(),
            "0.0.0.0" => system_hostname().ok_or_else(|| StorageError::InvalidAddress {
                address: self.storage_address.clone(),
                reason: "0.0.0.0 specified in storage addr but hostname is invalid".into(),
            })?,
            _ => host,
        };
        Ok(join_host_port(&host, &port))
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn split_host_port(address: &str) -> Result<(String, String), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("missing ']' in address"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| invalid("missing port in address"))?;
        return Ok((host.to_string(), port.to_string()));
    }
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port in address"))?;
    if host.contains(':') {
        return Err(invalid("too many colons in address"));
    }
    Ok((host.to_string(), port.to_string()))
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn system_hostname() -> Option<String> {
    if let Some(host) = env_non_empty("HOSTNAME") {
        return Some(host);
    }
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|host| !host.is_empty())
}

/// Parse durations written as `<n><unit>` segments, e.g. `90s`, `1m`, `1h30m`, `250ms`.
///
/// # Errors
///
/// Returns a message describing the first malformed segment.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if digits == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let overflow = || format!("duration {input:?} overflows");
        let segment = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(overflow)?),
            "h" => Duration::from_secs(value.checked_mul(60 * 60).ok_or_else(overflow)?),
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        total = total.checked_add(segment).ok_or_else(overflow)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_with(address: &str, advertised: Option<&str>) -> StorageOptions {
        StorageOptions {
            storage_address: address.to_string(),
            storage_adv_address: advertised.map(str::to_string),
            ..StorageOptions::default()
        }
    }

    #[test]
    fn advertised_address_prefers_explicit_value() {
        let options = options_with(":9090", Some("source-controller.flux-system.svc"));
        assert_eq!(
            options.advertised_address().unwrap(),
            "source-controller.flux-system.svc"
        );
    }

    #[test]
    fn advertised_address_defaults_empty_host_to_localhost() {
        let options = options_with(":9090", None);
        assert_eq!(options.advertised_address().unwrap(), "localhost:9090");
    }

    #[test]
    fn advertised_address_keeps_explicit_host() {
        let options = options_with("example.com:8080", None);
        assert_eq!(options.advertised_address().unwrap(), "example.com:8080");
        let options = options_with("[::1]:8080", None);
        assert_eq!(options.advertised_address().unwrap(), "[::1]:8080");
    }

    #[test]
    fn advertised_address_rejects_missing_port() {
        let err = options_with("localhost", None)
            .advertised_address()
            .unwrap_err();
        assert!(err.to_string().contains("invalid storage address"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let options = StorageOptions::default();
        assert_eq!(options.storage_path, PathBuf::from("/data"));
        assert_eq!(options.storage_address, ":9090");
        assert_eq!(options.artifact_retention_ttl, Duration::from_secs(60));
        assert_eq!(options.artifact_retention_records, 2);
        assert_eq!(options.artifact_digest_algo, DigestAlgorithm::Sha256);
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn rejects_overflowing_durations() {
        let err = parse_duration("5124095576030432h").unwrap_err();
        assert!(err.contains("overflows"), "unexpected error: {err}");
        assert!(parse_duration("307445734561825861m").is_err());
        assert!(parse_duration(&format!("{}s{}s", u64::MAX, u64::MAX)).is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
    }
}
