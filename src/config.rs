use std::{env, time::Duration};

use crate::error::{EncephalonError, Result};

/// Environment variable holding the base URL of the API.
pub const API_URL_VAR: &str = "API";
/// Environment variable holding the API token.
pub const API_TOKEN_VAR: &str = "API_TOKEN";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the Encephalon API.
///
/// The configuration is handed to [crate::EncephalonClient] at construction,
/// nothing in the crate reads the environment behind the caller's back.
/// [Config::from_env] is provided for binaries that follow the usual
/// `API` / `API_TOKEN` convention.
#[derive(Clone)]
pub struct Config {
    api_url: String,
    api_token: String,
    request_timeout: Duration,
}

impl Config {
    /// Builds a configuration from a base URL and a token.
    ///
    /// A trailing slash on the URL is trimmed so endpoint paths can be
    /// appended as-is.
    pub fn new(api_url: impl Into<String>, api_token: impl Into<String>) -> Result<Self> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&api_url)
            .map_err(|e| EncephalonError::InvalidConfig(format!("{api_url}: {e}")))?;

        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(EncephalonError::InvalidConfig(
                "API token is empty".to_string(),
            ));
        }

        Ok(Config {
            api_url,
            api_token,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Reads `API` and `API_TOKEN` from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_overrides(None, None)
    }

    /// Same as [Config::from_env] but explicit values win over the
    /// environment, which is how the CLI flags are applied.
    pub fn from_env_with_overrides(
        api_url: Option<String>,
        api_token: Option<String>,
    ) -> Result<Self> {
        let api_url = match api_url {
            Some(url) => url,
            None => env::var(API_URL_VAR).map_err(|_| EncephalonError::MissingEnv(API_URL_VAR))?,
        };
        let api_token = match api_token {
            Some(token) => token,
            None => {
                env::var(API_TOKEN_VAR).map_err(|_| EncephalonError::MissingEnv(API_TOKEN_VAR))?
            }
        };
        Self::new(api_url, api_token)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

// The token never ends up in logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("api_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
