use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Engine configuration.
///
/// An injected value object rather than ambient global state, so the engine
/// is testable without a live configuration subsystem. `from_env` exists for
/// deployments that configure through the environment; tests construct it
/// directly or use `Default`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum accepted topic title length, after sanitization.
    pub min_title_length: usize,
    /// Maximum accepted topic title length, after sanitization.
    pub max_title_length: usize,
    /// Whether two topics may share the same title.
    pub allow_duplicate_titles: bool,
    /// Rows kept in each category's featured-topics cache.
    pub category_featured_topics: i64,
    /// Per-user daily star budget, enforced through the rate-limit
    /// collaborator.
    pub max_stars_per_day: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_title_length: 3,
            max_title_length: 255,
            allow_duplicate_titles: true,
            category_featured_topics: 3,
            max_stars_per_day: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            min_title_length: parse_env_usize("MIN_TITLE_LENGTH", defaults.min_title_length)?,
            max_title_length: parse_env_usize("MAX_TITLE_LENGTH", defaults.max_title_length)?,
            allow_duplicate_titles: parse_env_bool(
                "ALLOW_DUPLICATE_TITLES",
                defaults.allow_duplicate_titles,
            )?,
            category_featured_topics: parse_env_i64(
                "CATEGORY_FEATURED_TOPICS",
                defaults.category_featured_topics,
            )?,
            max_stars_per_day: parse_env_u32("MAX_STARS_PER_DAY", defaults.max_stars_per_day)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is internally inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_title_length == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_TITLE_LENGTH".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.min_title_length > self.max_title_length {
            return Err(ConfigError::InvalidValue {
                name: "MIN_TITLE_LENGTH".to_string(),
                message: "must not exceed MAX_TITLE_LENGTH".to_string(),
            });
        }
        if self.category_featured_topics <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "CATEGORY_FEATURED_TOPICS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_i64(name: &str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|source| ConfigError::ParseInt {
            name: name.to_string(),
            source,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: v,
            }),
        },
        Err(_) => Ok(default),
    }
}
