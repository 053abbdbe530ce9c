use std::fmt;

pub const API_KEY_VAR: &str = "SHOPIFY_API_KEY";
pub const API_SECRET_VAR: &str = "SHOPIFY_API_SECRET";
pub const ACCESS_TOKEN_VAR: &str = "ACCESS_TOKEN";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CredentialsError {
    #[error("missing credential: {0} is not set")]
    Missing(&'static str),
}

/// Shop API credentials. Loaded once at startup and handed to the transport by value.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, CredentialsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves each credential through `lookup`. Unset or blank values are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(CredentialsError::Missing(name))
        };

        Ok(Credentials {
            api_key: require(API_KEY_VAR)?,
            api_secret: require(API_SECRET_VAR)?,
            access_token: require(ACCESS_TOKEN_VAR)?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .finish()
    }
}
