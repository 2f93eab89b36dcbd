//! Validation helpers and parsing utilities for raw setting values.

use std::time::Duration;

use url::Url;

use crate::error::{ConfigError, ConfigResult};

pub(crate) fn parse_url(field: &'static str, raw: &str) -> ConfigResult<Option<Url>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let url = Url::parse(trimmed).map_err(|_| ConfigError::invalid(field, "not_a_url", raw))?;
    if !matches!(url.scheme(), "http" | "https" | "udp") {
        return Err(ConfigError::invalid(field, "unsupported_scheme", raw));
    }
    Ok(Some(url))
}

pub(crate) fn parse_threshold_mb(field: &'static str, raw: &str) -> ConfigResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(field, "not_an_unsigned_integer", raw))
}

/// Negative values, `unlimited`, and empty strings mean "no cap".
pub(crate) fn parse_max_seeded(field: &'static str, raw: &str) -> ConfigResult<Option<usize>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unlimited") {
        return Ok(None);
    }
    let value = trimmed
        .parse::<i64>()
        .map_err(|_| ConfigError::invalid(field, "not_an_integer", raw))?;
    if value < 0 {
        return Ok(None);
    }
    if value == 0 {
        return Err(ConfigError::invalid(field, "zero", raw));
    }
    usize::try_from(value)
        .map(Some)
        .map_err(|_| ConfigError::invalid(field, "out_of_range", raw))
}

pub(crate) fn parse_secs(field: &'static str, raw: &str) -> ConfigResult<Duration> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(field, "not_an_unsigned_integer", raw))?;
    if secs == 0 {
        return Err(ConfigError::invalid(field, "zero", raw));
    }
    Ok(Duration::from_secs(secs))
}

pub(crate) fn parse_bool(field: &'static str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(field, "not_a_boolean", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_parsing_accepts_tracker_schemes() -> ConfigResult<()> {
        let url = parse_url("announce_url", " http://tracker:6969/announce ")?;
        assert_eq!(
            url.map(|url| url.to_string()),
            Some("http://tracker:6969/announce".to_string())
        );
        assert_eq!(parse_url("announce_url", "")?, None);
        assert!(parse_url("announce_url", "ftp://tracker/announce").is_err());
        assert!(parse_url("announce_url", "tracker").is_err());
        Ok(())
    }

    #[test]
    fn max_seeded_treats_negative_as_unlimited() -> ConfigResult<()> {
        assert_eq!(parse_max_seeded("max", "-1")?, None);
        assert_eq!(parse_max_seeded("max", "unlimited")?, None);
        assert_eq!(parse_max_seeded("max", "3")?, Some(3));
        assert_eq!(
            parse_max_seeded("max", "0"),
            Err(ConfigError::InvalidField {
                field: "max",
                reason: "zero",
                value: Some("0".into()),
            })
        );
        Ok(())
    }

    #[test]
    fn bool_parsing_handles_truthy_and_falsey() -> ConfigResult<()> {
        assert!(parse_bool("flag", "TrUe")?);
        assert!(!parse_bool("flag", "off")?);
        assert!(parse_bool("flag", "maybe").is_err());
        Ok(())
    }

    #[test]
    fn secs_parsing_rejects_zero() {
        assert!(parse_secs("interval", "0").is_err());
        assert_eq!(
            parse_secs("interval", "15").ok(),
            Some(Duration::from_secs(15))
        );
    }
}
