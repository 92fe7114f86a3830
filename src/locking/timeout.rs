// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::time::Duration;

/// How long an acquisition may wait for its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeoutValue {
    Finite(Duration),
    #[default]
    Infinite,
}

impl LockTimeoutValue {
    pub const fn from_secs(seconds: u64) -> Self {
        Self::Finite(Duration::from_secs(seconds))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self::Finite(Duration::from_millis(millis))
    }

    /// A zero budget turns acquisition into a single non-blocking attempt.
    pub fn is_immediate(&self) -> bool {
        matches!(self, LockTimeoutValue::Finite(limit) if limit.is_zero())
    }
}

impl fmt::Display for LockTimeoutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTimeoutValue::Infinite => f.write_str("infinite"),
            LockTimeoutValue::Finite(duration) if duration.subsec_millis() != 0 => {
                write!(f, "{}ms", duration.as_millis())
            }
            LockTimeoutValue::Finite(duration) => write!(f, "{}s", duration.as_secs()),
        }
    }
}

/// Where the effective timeout came from, highest precedence last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeoutSource {
    #[default]
    Default,
    Config,
    Environment,
    Cli,
}

impl fmt::Display for LockTimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockTimeoutSource::Default => "built-in default",
            LockTimeoutSource::Config => "configuration",
            LockTimeoutSource::Environment => "FAIRLOCK_LOCK_TIMEOUT",
            LockTimeoutSource::Cli => "--timeout flag",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeoutResolution {
    pub value: LockTimeoutValue,
    pub source: LockTimeoutSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeoutParseError {
    value: String,
}

impl fmt::Display for LockTimeoutParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock timeout '{}' is invalid. Use whole seconds ('30', '30s'), milliseconds \
             ('250ms'), or 'infinite'.",
            self.value
        )
    }
}

impl std::error::Error for LockTimeoutParseError {}

/// Parses `30`, `30s`, `250ms`, or `infinite` (case-insensitive).
pub fn parse_timeout_override(value: &str) -> Result<LockTimeoutValue, LockTimeoutParseError> {
    let trimmed = value.trim();
    let invalid = || LockTimeoutParseError {
        value: trimmed.to_string(),
    };

    if trimmed.eq_ignore_ascii_case("infinite") {
        return Ok(LockTimeoutValue::Infinite);
    }

    let lowered = trimmed.to_ascii_lowercase();
    let (digits, millis) = if let Some(ms) = lowered.strip_suffix("ms") {
        (ms, true)
    } else if let Some(secs) = lowered.strip_suffix('s') {
        (secs, false)
    } else {
        (lowered.as_str(), false)
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount = digits.parse::<u64>().map_err(|_| invalid())?;
    Ok(if millis {
        LockTimeoutValue::from_millis(amount)
    } else {
        LockTimeoutValue::from_secs(amount)
    })
}

/// Picks the effective timeout: CLI flag, then environment, then
/// configuration, then the built-in default.
pub struct LockTimeoutResolver<'a> {
    cli_override: Option<&'a str>,
    env_override: Option<&'a str>,
    config_value: Option<LockTimeoutValue>,
    default_value: LockTimeoutValue,
}

impl<'a> LockTimeoutResolver<'a> {
    pub fn new(default_value: LockTimeoutValue) -> Self {
        Self {
            cli_override: None,
            env_override: None,
            config_value: None,
            default_value,
        }
    }

    pub fn with_cli(mut self, value: Option<&'a str>) -> Self {
        self.cli_override = value;
        self
    }

    pub fn with_env(mut self, value: Option<&'a str>) -> Self {
        self.env_override = value;
        self
    }

    pub fn with_config(mut self, value: LockTimeoutValue) -> Self {
        self.config_value = Some(value);
        self
    }

    pub fn resolve(self) -> Result<LockTimeoutResolution, LockTimeoutParseError> {
        if let Some(cli_value) = self.cli_override {
            return Ok(LockTimeoutResolution {
                value: parse_timeout_override(cli_value)?,
                source: LockTimeoutSource::Cli,
            });
        }

        if let Some(env_value) = self.env_override {
            return Ok(LockTimeoutResolution {
                value: parse_timeout_override(env_value)?,
                source: LockTimeoutSource::Environment,
            });
        }

        match self.config_value {
            Some(value) if value != self.default_value => Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Config,
            }),
            _ => Ok(LockTimeoutResolution {
                value: self.default_value,
                source: LockTimeoutSource::Default,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_seconds_and_millis() {
        assert_eq!(
            parse_timeout_override("42").unwrap(),
            LockTimeoutValue::from_secs(42)
        );
        assert_eq!(
            parse_timeout_override("42s").unwrap(),
            LockTimeoutValue::from_secs(42)
        );
        assert_eq!(
            parse_timeout_override(" 250ms ").unwrap(),
            LockTimeoutValue::from_millis(250)
        );
        assert!(parse_timeout_override("0").unwrap().is_immediate());
    }

    #[test]
    fn parse_infinite_keyword() {
        assert_eq!(
            parse_timeout_override("INFINITE").unwrap(),
            LockTimeoutValue::Infinite
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        for value in ["abc", "", "ms", "-5", "+5", "1.5s"] {
            let err = parse_timeout_override(value).unwrap_err();
            assert!(err.to_string().contains("'infinite'"), "{value}");
        }
    }

    #[test]
    fn display_round_trips_through_parser() {
        for value in [
            LockTimeoutValue::Infinite,
            LockTimeoutValue::from_secs(30),
            LockTimeoutValue::from_millis(1_250),
        ] {
            assert_eq!(parse_timeout_override(&value.to_string()).unwrap(), value);
        }
    }

    #[test]
    fn resolver_prefers_cli_over_env() {
        let resolution = LockTimeoutResolver::new(LockTimeoutValue::Infinite)
            .with_cli(Some("5"))
            .with_env(Some("10"))
            .with_config(LockTimeoutValue::from_secs(20))
            .resolve()
            .unwrap();
        assert_eq!(resolution.source, LockTimeoutSource::Cli);
        assert_eq!(resolution.value, LockTimeoutValue::from_secs(5));
    }

    #[test]
    fn resolver_uses_env_then_config() {
        let from_env = LockTimeoutResolver::new(LockTimeoutValue::Infinite)
            .with_env(Some("10"))
            .with_config(LockTimeoutValue::from_secs(20))
            .resolve()
            .unwrap();
        assert_eq!(from_env.source, LockTimeoutSource::Environment);

        let from_config = LockTimeoutResolver::new(LockTimeoutValue::Infinite)
            .with_config(LockTimeoutValue::from_secs(20))
            .resolve()
            .unwrap();
        assert_eq!(from_config.source, LockTimeoutSource::Config);
        assert_eq!(from_config.value, LockTimeoutValue::from_secs(20));
    }

    #[test]
    fn resolver_reports_default_when_config_matches() {
        let resolution = LockTimeoutResolver::new(LockTimeoutValue::Infinite)
            .with_config(LockTimeoutValue::Infinite)
            .resolve()
            .unwrap();
        assert_eq!(resolution.source, LockTimeoutSource::Default);
    }

    #[test]
    fn resolver_surfaces_bad_cli_value() {
        assert!(
            LockTimeoutResolver::new(LockTimeoutValue::Infinite)
                .with_cli(Some("soon"))
                .resolve()
                .is_err()
        );
    }
}
