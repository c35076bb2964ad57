use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::locale::Locale;
use super::policy::{LoginAttemptPolicy, SessionSeed};

const FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);
const MAX_FLOWS: usize = 10_000;

/// Who the pending second factor belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwoFactorSubject {
    Username(String),
    OAuthToken(String),
}

/// One mounted login page. Reloading the page mounts a new flow, so attempt
/// state never outlives it.
#[derive(Debug)]
pub struct LoginFlow {
    pub id: String,
    pub policy: LoginAttemptPolicy,
    pub subject: Option<TwoFactorSubject>,
    pub username: String,
    last_seen: Instant,
}

impl LoginFlow {
    fn new(seed: SessionSeed, locale: Locale) -> Self {
        let subject = match (&seed.oauth_token, &seed.prefilled_username) {
            (Some(token), _) => Some(TwoFactorSubject::OAuthToken(token.clone())),
            (None, Some(username)) if seed.force_two_factor => {
                Some(TwoFactorSubject::Username(username.clone()))
            }
            _ => None,
        };
        LoginFlow {
            id: Uuid::new_v4().to_string(),
            username: seed.prefilled_username.clone().unwrap_or_default(),
            policy: LoginAttemptPolicy::new(seed, locale),
            subject,
            last_seen: Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.last_seen.elapsed() > FLOW_IDLE_TIMEOUT
    }
}

/// Bounded map of live flows; the least recently seen flow is evicted once
/// the limit is reached.
pub struct LoginFlowStore {
    flows: HashMap<String, LoginFlow>,
    max_flows: usize,
}

impl LoginFlowStore {
    pub fn new() -> Self {
        Self::with_limit(MAX_FLOWS)
    }

    pub fn with_limit(max_flows: usize) -> Self {
        LoginFlowStore {
            flows: HashMap::new(),
            max_flows: max_flows.max(1),
        }
    }

    pub fn mount(&mut self, seed: SessionSeed, locale: Locale) -> &mut LoginFlow {
        self.cleanup_expired();
        while self.flows.len() >= self.max_flows {
            self.evict_oldest();
        }
        let flow = LoginFlow::new(seed, locale);
        let id = flow.id.clone();
        tracing::debug!("Mounted login flow {} ({} active)", id, self.flows.len() + 1);
        self.flows.entry(id).or_insert(flow)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LoginFlow> {
        let flow = self.flows.get_mut(id).filter(|f| !f.is_expired())?;
        flow.last_seen = Instant::now();
        Some(flow)
    }

    pub fn get(&self, id: &str) -> Option<&LoginFlow> {
        self.flows.get(id).filter(|f| !f.is_expired())
    }

    pub fn remove(&mut self, id: &str) {
        self.flows.remove(id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    fn cleanup_expired(&mut self) {
        self.flows.retain(|_, f| !f.is_expired());
    }

    fn evict_oldest(&mut self) {
        let Some(oldest) = self
            .flows
            .values()
            .min_by_key(|f| f.last_seen)
            .map(|f| f.id.clone())
        else {
            return;
        };
        tracing::debug!("Evicting login flow {} (store full)", oldest);
        self.flows.remove(&oldest);
    }
}
