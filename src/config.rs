use crate::login::locale::Locale;

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub default_locale: Locale,
    pub account: AccountConfig,
}

#[derive(Clone)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    pub two_factor_code: Option<String>,
    pub oauth_tokens: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let username = std::env::var("BLOGLOGIN_USERNAME")
            .map_err(|_| anyhow::anyhow!("BLOGLOGIN_USERNAME environment variable is required"))?;
        let password = std::env::var("BLOGLOGIN_PASSWORD")
            .map_err(|_| anyhow::anyhow!("BLOGLOGIN_PASSWORD environment variable is required"))?;

        let default_locale = match std::env::var("BLOGLOGIN_DEFAULT_LANG") {
            Ok(code) => Locale::from_code(&code)
                .map_err(|_| anyhow::anyhow!("BLOGLOGIN_DEFAULT_LANG '{}' is not supported", code))?,
            Err(_) => Locale::default(),
        };

        Ok(Config {
            bind_addr: {
                let port = std::env::var("BLOGLOGIN_PORT").unwrap_or_else(|_| "8080".to_string());
                std::env::var("BLOGLOGIN_BIND_ADDR")
                    .unwrap_or_else(|_| format!("0.0.0.0:{}", port))
            },
            default_locale,
            account: AccountConfig {
                username,
                password,
                two_factor_code: std::env::var("BLOGLOGIN_TWO_FACTOR_CODE")
                    .ok()
                    .filter(|c| !c.trim().is_empty()),
                oauth_tokens: std::env::var("BLOGLOGIN_OAUTH_TOKENS")
                    .map(|v| parse_list(&v))
                    .unwrap_or_default(),
            },
        })
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
