use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;

/// Sliding lifetime of a signed-in session.
const SESSION_IDLE_SECS: i64 = 3600;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct UserSession {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Signed-in users, keyed by cookie token. Every successful lookup pushes the
/// expiry forward.
pub struct SessionStore {
    by_token: HashMap<String, UserSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            by_token: HashMap::new(),
        }
    }

    pub fn create(&mut self, username: String, now: DateTime<Utc>) -> UserSession {
        self.by_token.retain(|_, s| s.expires_at > now);
        let session = UserSession {
            token: new_token(),
            username,
            expires_at: now + TimeDelta::seconds(SESSION_IDLE_SECS),
        };
        self.by_token.insert(session.token.clone(), session.clone());
        session
    }

    /// Returns the signed-in username and extends the session.
    pub fn touch(&mut self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let session = self.by_token.get_mut(token)?;
        if session.expires_at <= now {
            self.by_token.remove(token);
            return None;
        }
        session.expires_at = now + TimeDelta::seconds(SESSION_IDLE_SECS);
        Some(session.username.clone())
    }

    pub fn remove(&mut self, token: &str) -> Option<UserSession> {
        self.by_token.remove(token)
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
