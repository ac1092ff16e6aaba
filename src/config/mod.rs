use clap::Args;
use thiserror::Error;
use tracing::warn;
use validator::Validate;

use crate::{
    notify::{
        registry::StreamerProfiles,
        template::{check, TemplateError},
        Source, SourceTemplates, Templates,
    },
    sink::twitter::{OAuth1Credentials, TwitterAuth},
};

pub const DEFAULT_TWITCH_TEMPLATE: &str = "{display_name} is now live on Twitch! 🎮\n\n📺 {title}\n🎯 Playing: {game}\n\n👉 https://twitch.tv/{channel}";
pub const DEFAULT_YOUTUBE_TEMPLATE: &str = "{display_name} is now live on YouTube! 🔴\n\n📺 {title}\n\n👉 https://youtube.com/watch?v={video_id}";
const DEFAULT_CHECK_INTERVAL: u64 = 60;

/// Raw settings, read from flags or the environment. Nothing here is validated yet.
#[derive(Args, Debug, Clone, Default)]
pub struct Settings {
    /// Twitch application client id
    #[arg(long, env = "TWITCH_CLIENT_ID", hide_env_values = true)]
    pub twitch_client_id: Option<String>,
    #[arg(long, env = "TWITCH_CLIENT_SECRET", hide_env_values = true)]
    pub twitch_client_secret: Option<String>,
    /// Comma separated twitch logins to watch
    #[arg(long, env = "TWITCH_CHANNELS")]
    pub twitch_channels: Option<String>,
    /// Comma separated display names, by channel position
    #[arg(long, env = "DISPLAY_NAMES")]
    pub display_names: Option<String>,
    /// Comma separated fan labels, by channel position
    #[arg(long, env = "FANNAMES")]
    pub fannames: Option<String>,
    /// Comma separated youtube channel ids to poll
    #[arg(long, env = "YOUTUBE_CHANNELS")]
    pub youtube_channels: Option<String>,
    /// Video ids that are already announced, e.g. scheduled streams
    #[arg(long, env = "YOUTUBE_SCHEDULED_STREAMS")]
    pub youtube_scheduled_streams: Option<String>,
    /// Seconds between youtube checks
    #[arg(long, env = "YOUTUBE_CHECK_INTERVAL")]
    pub youtube_check_interval: Option<String>,
    #[arg(long, env = "TWITTER_API_KEY", hide_env_values = true)]
    pub twitter_api_key: Option<String>,
    #[arg(long, env = "TWITTER_API_SECRET", hide_env_values = true)]
    pub twitter_api_secret: Option<String>,
    #[arg(long, env = "TWITTER_ACCESS_TOKEN", hide_env_values = true)]
    pub twitter_access_token: Option<String>,
    #[arg(long, env = "TWITTER_ACCESS_TOKEN_SECRET", hide_env_values = true)]
    pub twitter_access_token_secret: Option<String>,
    /// OAuth 2.0 user token, instead of the four OAuth 1.0a values
    #[arg(long, env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
    pub twitter_bearer_token: Option<String>,
    #[arg(long, env = "THREADS_ACCESS_TOKEN", hide_env_values = true)]
    pub threads_access_token: Option<String>,
    #[arg(long, env = "THREADS_USER_ID")]
    pub threads_user_id: Option<String>,
    #[arg(long, env = "TWITCH_NOTIFICATION_TEMPLATE")]
    pub twitch_notification_template: Option<String>,
    /// Older name of TWITCH_NOTIFICATION_TEMPLATE
    #[arg(long, env = "NOTIFICATION_TEMPLATE", hide = true)]
    pub notification_template: Option<String>,
    #[arg(long, env = "YOUTUBE_NOTIFICATION_TEMPLATE")]
    pub youtube_notification_template: Option<String>,
    /// Empty disables threads posts for twitch
    #[arg(long, env = "TWITCH_THREADS_TEMPLATE")]
    pub twitch_threads_template: Option<String>,
    /// Empty disables threads posts for youtube
    #[arg(long, env = "YOUTUBE_THREADS_TEMPLATE")]
    pub youtube_threads_template: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("set either the TWITTER_API_* / TWITTER_ACCESS_* values or TWITTER_BEARER_TOKEN, not both")]
    ConflictingTwitterAuth,
    #[error("{name} is not a number: {value}")]
    NotANumber { name: &'static str, value: String },
    #[error("{name}: {source}")]
    Template {
        name: &'static str,
        #[source]
        source: TemplateError,
    },
    #[error(transparent)]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    #[validate(length(min = 1))]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct YoutubeConfig {
    pub channels: Vec<String>,
    pub scheduled_streams: Vec<String>,
    /// Seconds
    #[validate(range(min = 1))]
    pub check_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadsConfig {
    pub user_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Validate)]
pub struct Config {
    #[validate(nested)]
    pub twitch: TwitchConfig,
    #[validate(nested)]
    pub youtube: YoutubeConfig,
    pub profiles: StreamerProfiles,
    pub twitter: TwitterAuth,
    pub threads: Option<ThreadsConfig>,
    pub templates: SourceTemplates,
}

impl Config {
    /// Validates everything at once, so a missing setting is reported together with the others.
    pub fn from_settings(settings: &Settings) -> Result<Config, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |value: &Option<String>, name: &'static str| {
            let value = present(value);
            if value.is_none() {
                missing.push(name);
            }
            value
        };
        let client_id = require(&settings.twitch_client_id, "TWITCH_CLIENT_ID");
        let client_secret = require(&settings.twitch_client_secret, "TWITCH_CLIENT_SECRET");
        let channels = split_list(settings.twitch_channels.as_deref());
        if channels.is_empty() {
            missing.push("TWITCH_CHANNELS");
        }
        let twitter = match settings.twitter_auth() {
            Ok(auth) => Some(auth),
            Err(ConfigError::Missing(names)) => {
                missing.extend(names);
                None
            }
            Err(err) => return Err(err),
        };
        let (Some(client_id), Some(client_secret), Some(twitter), true) =
            (client_id, client_secret, twitter, missing.is_empty())
        else {
            return Err(ConfigError::Missing(missing));
        };

        let config = Config {
            twitch: TwitchConfig {
                client_id,
                client_secret,
                channels,
            },
            youtube: YoutubeConfig {
                channels: split_list(settings.youtube_channels.as_deref()),
                scheduled_streams: split_list(settings.youtube_scheduled_streams.as_deref()),
                check_interval: settings.check_interval()?,
            },
            profiles: settings.profiles(),
            twitter,
            threads: settings.threads(),
            templates: settings.templates()?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Settings {
    pub fn profiles(&self) -> StreamerProfiles {
        StreamerProfiles {
            display_names: split_list(self.display_names.as_deref()),
            fan_labels: split_list(self.fannames.as_deref()),
        }
    }

    fn check_interval(&self) -> Result<u64, ConfigError> {
        match present(&self.youtube_check_interval) {
            None => Ok(DEFAULT_CHECK_INTERVAL),
            Some(value) => match value.parse() {
                Ok(secs) => Ok(secs),
                Err(_) => Err(ConfigError::NotANumber {
                    name: "YOUTUBE_CHECK_INTERVAL",
                    value,
                }),
            },
        }
    }

    /// Either all four OAuth 1.0a values or the bearer token.
    pub fn twitter_auth(&self) -> Result<TwitterAuth, ConfigError> {
        let oauth1 = [
            ("TWITTER_API_KEY", present(&self.twitter_api_key)),
            ("TWITTER_API_SECRET", present(&self.twitter_api_secret)),
            ("TWITTER_ACCESS_TOKEN", present(&self.twitter_access_token)),
            (
                "TWITTER_ACCESS_TOKEN_SECRET",
                present(&self.twitter_access_token_secret),
            ),
        ];
        let any_oauth1 = oauth1.iter().any(|(_, value)| value.is_some());

        match (any_oauth1, present(&self.twitter_bearer_token)) {
            (true, Some(_)) => Err(ConfigError::ConflictingTwitterAuth),
            (false, Some(token)) => Ok(TwitterAuth::Bearer(token)),
            _ => {
                let missing = oauth1
                    .iter()
                    .filter(|(_, value)| value.is_none())
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>();
                let [(_, Some(consumer_key)), (_, Some(consumer_secret)), (_, Some(access_token)), (_, Some(access_token_secret))] =
                    oauth1
                else {
                    return Err(ConfigError::Missing(missing));
                };
                Ok(TwitterAuth::OAuth1(OAuth1Credentials {
                    consumer_key,
                    consumer_secret,
                    access_token,
                    access_token_secret,
                }))
            }
        }
    }

    /// Threads is enabled only when both values are set.
    pub fn threads(&self) -> Option<ThreadsConfig> {
        match (
            present(&self.threads_access_token),
            present(&self.threads_user_id),
        ) {
            (Some(access_token), Some(user_id)) => Some(ThreadsConfig {
                user_id,
                access_token,
            }),
            (None, None) => None,
            _ => {
                warn!("Only one of THREADS_ACCESS_TOKEN and THREADS_USER_ID is set, threads posting is disabled");
                None
            }
        }
    }

    /// Templates with defaults applied, checked against the placeholders of their source.
    pub fn templates(&self) -> Result<SourceTemplates, ConfigError> {
        let templates = SourceTemplates {
            twitch: Templates {
                primary: normalized(&self.twitch_notification_template)
                    .or_else(|| normalized(&self.notification_template))
                    .unwrap_or_else(|| DEFAULT_TWITCH_TEMPLATE.to_owned()),
                secondary: normalized(&self.twitch_threads_template),
            },
            youtube: Templates {
                primary: normalized(&self.youtube_notification_template)
                    .unwrap_or_else(|| DEFAULT_YOUTUBE_TEMPLATE.to_owned()),
                secondary: normalized(&self.youtube_threads_template),
            },
        };

        let checks = [
            (
                "TWITCH_NOTIFICATION_TEMPLATE",
                Source::Twitch,
                Some(&templates.twitch.primary),
            ),
            (
                "TWITCH_THREADS_TEMPLATE",
                Source::Twitch,
                templates.twitch.secondary.as_ref(),
            ),
            (
                "YOUTUBE_NOTIFICATION_TEMPLATE",
                Source::YouTube,
                Some(&templates.youtube.primary),
            ),
            (
                "YOUTUBE_THREADS_TEMPLATE",
                Source::YouTube,
                templates.youtube.secondary.as_ref(),
            ),
        ];
        for (name, kind, template) in checks {
            if let Some(template) = template {
                check(template, &kind.field_names())
                    .map_err(|source| ConfigError::Template { name, source })?;
            }
        }

        Ok(templates)
    }
}

/// Turns literal `\n` sequences into newlines.
pub fn normalize_template(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

/// Splits on `,`, trimming items and dropping empty ones.
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn normalized(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(normalize_template)
}
