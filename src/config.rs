//! Configuration types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::engine::EngineOptions;
use crate::error::ConfigError;
use crate::rules::{PrivateChatSign, ViewOptions};

pub const RULES_FILE_ENV: &str = "BOUNCE_RULES_FILE";
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const PRIVATE_CHAT_SIGN_ENV: &str = "BOUNCE_PRIVATE_CHAT_SIGN";
pub const POLL_TIMEOUT_ENV: &str = "TELEGRAM_POLL_TIMEOUT_SECS";

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Which chat transport drives the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Telegram Bot API long polling.
    Telegram,
    /// JSON lines on stdin/stdout.
    Stdio,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telegram => f.write_str("telegram"),
            Self::Stdio => f.write_str("stdio"),
        }
    }
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub rules_file: Option<PathBuf>,
    pub transport: Option<TransportKind>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct BounceConfig {
    /// Rules file, also re-read on reload.
    pub rules_file: PathBuf,
    pub transport: TransportKind,
    /// Required by the Telegram transport.
    pub bot_token: Option<SecretString>,
    pub private_chat_sign: PrivateChatSign,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout: Duration,
}

impl BounceConfig {
    /// Resolve from the process environment.
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        Self::from_lookup(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve using `lookup` for environment variables. Empty values count as unset.
    pub fn from_lookup<F>(overrides: Overrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rules_file = match overrides.rules_file {
            Some(path) => path,
            None => match var(RULES_FILE_ENV) {
                Some(path) => PathBuf::from(path),
                None => default_rules_file(var("HOME"))?,
            },
        };

        let bot_token = var(BOT_TOKEN_ENV).map(SecretString::from);

        let transport = match overrides.transport {
            Some(kind) => kind,
            None if bot_token.is_some() => TransportKind::Telegram,
            None => TransportKind::Stdio,
        };
        if transport == TransportKind::Telegram && bot_token.is_none() {
            return Err(ConfigError::MissingRequired {
                key: BOT_TOKEN_ENV.into(),
                hint: "The telegram transport needs a bot token: export TELEGRAM_BOT_TOKEN=123:ABC"
                    .into(),
            });
        }

        let private_chat_sign = match var(PRIVATE_CHAT_SIGN_ENV) {
            Some(raw) => PrivateChatSign::from_str(&raw)?,
            None => PrivateChatSign::default(),
        };

        let poll_timeout = match var(POLL_TIMEOUT_ENV) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: POLL_TIMEOUT_ENV.into(),
                    message: format!("'{raw}' is not a number of seconds: {e}"),
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        };

        Ok(Self {
            rules_file,
            transport,
            bot_token,
            private_chat_sign,
            poll_timeout,
        })
    }

    /// Engine settings derived from this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            rules_file: Some(self.rules_file.clone()),
            view: ViewOptions {
                private_chat_sign: self.private_chat_sign,
            },
        }
    }
}

/// `$HOME/.tgbounce/rules.json`
fn default_rules_file(home: Option<String>) -> Result<PathBuf, ConfigError> {
    let home = home.ok_or_else(|| ConfigError::MissingRequired {
        key: RULES_FILE_ENV.into(),
        hint: "Pass a rules file or set BOUNCE_RULES_FILE (HOME is not set)".into(),
    })?;
    Ok(PathBuf::from(home).join(".tgbounce").join("rules.json"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn resolve(overrides: Overrides, vars: &[(&str, &str)]) -> Result<BounceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BounceConfig::from_lookup(overrides, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = resolve(Overrides::default(), &[("HOME", "/home/bob")]).unwrap();
        assert_eq!(config.rules_file, PathBuf::from("/home/bob/.tgbounce/rules.json"));
        assert_eq!(config.transport, TransportKind::Stdio);
        assert!(config.bot_token.is_none());
        assert_eq!(config.private_chat_sign, PrivateChatSign::Positive);
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rules_file_precedence() {
        let env = [("HOME", "/home/bob"), (RULES_FILE_ENV, "/etc/bounce.json")];
        let from_env = resolve(Overrides::default(), &env).unwrap();
        assert_eq!(from_env.rules_file, PathBuf::from("/etc/bounce.json"));

        let overrides = Overrides {
            rules_file: Some(PathBuf::from("local.json")),
            transport: None,
        };
        let from_cli = resolve(overrides, &env).unwrap();
        assert_eq!(from_cli.rules_file, PathBuf::from("local.json"));
    }

    #[test]
    fn missing_home_without_rules_file_is_an_error() {
        let err = resolve(Overrides::default(), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == RULES_FILE_ENV));
    }

    #[test]
    fn token_selects_telegram() {
        let config = resolve(
            Overrides::default(),
            &[("HOME", "/h"), (BOT_TOKEN_ENV, "123:ABC")],
        )
        .unwrap();
        assert_eq!(config.transport, TransportKind::Telegram);
        assert_eq!(
            config.bot_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("123:ABC".to_string())
        );

        let forced = resolve(
            Overrides {
                rules_file: None,
                transport: Some(TransportKind::Stdio),
            },
            &[("HOME", "/h"), (BOT_TOKEN_ENV, "123:ABC")],
        )
        .unwrap();
        assert_eq!(forced.transport, TransportKind::Stdio);
    }

    #[test]
    fn telegram_without_token_is_an_error() {
        let overrides = Overrides {
            rules_file: None,
            transport: Some(TransportKind::Telegram),
        };
        let err = resolve(overrides, &[("HOME", "/h"), (BOT_TOKEN_ENV, "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == BOT_TOKEN_ENV));
    }

    #[test]
    fn parses_sign_and_timeout() {
        let config = resolve(
            Overrides::default(),
            &[
                ("HOME", "/h"),
                (PRIVATE_CHAT_SIGN_ENV, "negative"),
                (POLL_TIMEOUT_ENV, "50"),
            ],
        )
        .unwrap();
        assert_eq!(config.private_chat_sign, PrivateChatSign::Negative);
        assert_eq!(config.poll_timeout, Duration::from_secs(50));
        assert_eq!(
            config.engine_options().view.private_chat_sign,
            PrivateChatSign::Negative
        );
        assert_eq!(
            config.engine_options().rules_file,
            Some(PathBuf::from("/h/.tgbounce/rules.json"))
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let bad_sign = resolve(
            Overrides::default(),
            &[("HOME", "/h"), (PRIVATE_CHAT_SIGN_ENV, "sideways")],
        );
        assert!(matches!(bad_sign, Err(ConfigError::InvalidValue { .. })));

        let bad_timeout = resolve(
            Overrides::default(),
            &[("HOME", "/h"), (POLL_TIMEOUT_ENV, "soon")],
        );
        assert!(
            matches!(bad_timeout, Err(ConfigError::InvalidValue { ref key, .. }) if key == POLL_TIMEOUT_ENV)
        );
    }
}
