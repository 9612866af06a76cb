use serde::{Deserialize, Serialize};

/// UI colour scheme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("unknown theme '{other}'")),
        }
    }
}

/// Global user preferences. Always read and written as one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub api_token: Option<String>,
    pub max_torrents: usize,
    pub poll_interval_secs: u64,
    pub max_retry_duration_secs: u64,
    pub always_save_all_files: bool,
    pub notifications_enabled: bool,
    pub theme: Theme,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            api_token: None,
            max_torrents: 50,
            poll_interval_secs: 30,
            max_retry_duration_secs: 300,
            always_save_all_files: false,
            notifications_enabled: true,
            theme: Theme::System,
        }
    }
}

impl Preferences {
    /// The configured API token, if it is non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn has_credential(&self) -> bool {
        self.credential().is_some()
    }

    /// Set one preference from its key and a string value.
    ///
    /// Keys match the serialized (camelCase) names; snake_case is accepted too.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("invalid value '{value}' for {key}"))
        }

        match key {
            "apiToken" | "api_token" => {
                let token = value.trim();
                self.api_token = (!token.is_empty()).then(|| token.to_string());
            }
            "maxTorrents" | "max_torrents" => {
                let max: usize = parse(key, value)?;
                if max == 0 {
                    return Err("maxTorrents must be at least 1".into());
                }
                self.max_torrents = max;
            }
            "pollIntervalSecs" | "poll_interval_secs" => {
                let secs: u64 = parse(key, value)?;
                if secs == 0 {
                    return Err("pollIntervalSecs must be at least 1".into());
                }
                self.poll_interval_secs = secs;
            }
            "maxRetryDurationSecs" | "max_retry_duration_secs" => {
                self.max_retry_duration_secs = parse(key, value)?;
            }
            "alwaysSaveAllFiles" | "always_save_all_files" => {
                self.always_save_all_files = parse(key, value)?;
            }
            "notificationsEnabled" | "notifications_enabled" => {
                self.notifications_enabled = parse(key, value)?;
            }
            "theme" => self.theme = value.parse()?,
            other => return Err(format!("unknown preference '{other}'")),
        }
        Ok(())
    }
}
