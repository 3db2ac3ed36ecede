//! Serde helpers for human-readable durations in configuration.
//!
//! Durations serialize as humantime strings (`"5m"`, `"1s 500ms"`) and
//! deserialize from either such a string or a plain number of seconds.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::{fmt, time::Duration};

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a duration as seconds (number) or human-readable string (e.g., '50ms', '5m', '1h30m')")
    }

    fn visit_u64<E>(self, seconds: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Duration::from_secs(seconds))
    }

    fn visit_i64<E>(self, seconds: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(seconds)
            .map(Duration::from_secs)
            .map_err(|_| de::Error::custom(format!("Duration must not be negative: {seconds}")))
    }

    fn visit_f64<E>(self, seconds: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Duration::try_from_secs_f64(seconds)
            .map_err(|e| de::Error::custom(format!("Invalid duration {seconds}: {e}")))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        humantime::parse_duration(value)
            .map_err(|e| de::Error::custom(format!("Invalid duration '{value}': {e}")))
    }
}

/// Custom serde functions for Duration that support human-readable strings
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration_str = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&duration_str)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Custom serde functions for Option<Duration> that support human-readable strings
pub mod option_duration {
    use super::*;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                let duration_str = humantime::format_duration(*d).to_string();
                serializer.serialize_some(&duration_str)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OptionDurationVisitor;

        impl<'de> Visitor<'de> for OptionDurationVisitor {
            type Value = Option<Duration>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter
                    .write_str("null or a duration as seconds (number) or human-readable string")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(None)
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                super::duration::deserialize(deserializer).map(Some)
            }
        }

        deserializer.deserialize_option(OptionDurationVisitor)
    }
}

/// Parse one of the string constants in `defaults` into a Duration.
///
/// Falls back to zero for a malformed constant, which the unit tests guard against.
pub(crate) fn parse_default(value: &str) -> Duration {
    humantime::parse_duration(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Wrapper {
        #[serde(with = "duration")]
        interval: Duration,
        #[serde(default, with = "option_duration", skip_serializing_if = "Option::is_none")]
        timeout: Option<Duration>,
    }

    #[test]
    fn test_deserialize_human_readable_string() {
        let parsed: Wrapper = toml::from_str("interval = \"5m\"\ntimeout = \"50ms\"").unwrap();
        assert_eq!(parsed.interval, Duration::from_secs(300));
        assert_eq!(parsed.timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_deserialize_plain_seconds() {
        let parsed: Wrapper = toml::from_str("interval = 30").unwrap();
        assert_eq!(parsed.interval, Duration::from_secs(30));
        assert_eq!(parsed.timeout, None);
    }

    #[test]
    fn test_serialize_round_trips_through_toml() {
        let original = Wrapper {
            interval: Duration::from_millis(1500),
            timeout: None,
        };
        let text = toml::to_string(&original).unwrap();
        assert!(text.contains("1s 500ms"));
        let parsed: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_default_constants_parse() {
        use crate::config::defaults::*;
        for value in [
            DEFAULT_POLL_INTERVAL,
            DEFAULT_LAUNCH_STAGGER,
            DEFAULT_RETUNE_INTERVAL,
            DEFAULT_POST_JOB_DELAY,
            DEFAULT_ERROR_BACKOFF,
            DEFAULT_SHUTDOWN_GRACE,
            DEFAULT_MAX_JITTER,
            DEFAULT_LONG_PAUSE_MIN,
            DEFAULT_LONG_PAUSE_MAX,
            DEFAULT_EXECUTOR_TIMEOUT,
            DEFAULT_SIMULATED_MIN_DURATION,
            DEFAULT_SIMULATED_MAX_DURATION,
        ] {
            assert!(parse_default(value) > Duration::ZERO, "{value} did not parse");
        }
    }
}
