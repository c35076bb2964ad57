use std::collections::HashSet;

use crate::config::AccountConfig;
use crate::login::flow::TwoFactorSubject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    TwoFactorRequired,
    Rejected,
}

/// Credential verification service. The login flow only ever reports the
/// outcome back to its attempt policy.
pub trait AuthBackend: Send + Sync {
    fn login(&self, username: &str, password: &str) -> LoginOutcome;

    /// Returns the signed-in username when the code is accepted.
    fn verify_two_factor(&self, subject: &TwoFactorSubject, code: &str) -> Option<String>;

    fn verify_captcha(&self, response: &str) -> bool {
        !response.trim().is_empty()
    }
}

/// Single-account backend configured from the environment.
pub struct StaticAuthBackend {
    username: String,
    password: String,
    two_factor_code: Option<String>,
    oauth_tokens: HashSet<String>,
}

impl StaticAuthBackend {
    pub fn new(account: &AccountConfig) -> Self {
        StaticAuthBackend {
            username: account.username.clone(),
            password: account.password.clone(),
            two_factor_code: account.two_factor_code.clone(),
            oauth_tokens: account.oauth_tokens.iter().cloned().collect(),
        }
    }

    fn code_matches(&self, code: &str) -> bool {
        self.two_factor_code
            .as_deref()
            .is_some_and(|expected| expected == code.trim())
    }
}

impl AuthBackend for StaticAuthBackend {
    fn login(&self, username: &str, password: &str) -> LoginOutcome {
        if username != self.username || password != self.password {
            return LoginOutcome::Rejected;
        }
        if self.two_factor_code.is_some() {
            LoginOutcome::TwoFactorRequired
        } else {
            LoginOutcome::Authenticated
        }
    }

    fn verify_two_factor(&self, subject: &TwoFactorSubject, code: &str) -> Option<String> {
        let known = match subject {
            TwoFactorSubject::Username(username) => username == &self.username,
            TwoFactorSubject::OAuthToken(token) => self.oauth_tokens.contains(token),
        };
        (known && self.code_matches(code)).then(|| self.username.clone())
    }
}
