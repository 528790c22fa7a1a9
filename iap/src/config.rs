use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "IAP_DEDUPE_ENABLED", default = "false")]
    pub dedupe_enabled: bool,

    /// Used when the remote configuration reports a zero dedup window.
    #[envconfig(from = "IAP_FALLBACK_DEDUP_WINDOW_MS", default = "60000")]
    pub fallback_dedup_window: EnvMsDuration,

    /// Used when the remote configuration reports a zero observation time.
    #[envconfig(from = "IAP_FALLBACK_OBSERVATION_INTERVAL_MS", default = "3600000")]
    pub fallback_observation_interval: EnvMsDuration,

    #[envconfig(from = "IAP_SDK_VERSION", default = "17.0.0")]
    pub sdk_version: NonEmptyString,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dedupe_enabled: false,
            fallback_dedup_window: EnvMsDuration(time::Duration::from_secs(60)),
            fallback_observation_interval: EnvMsDuration(time::Duration::from_secs(3600)),
            sdk_version: NonEmptyString("17.0.0".to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
