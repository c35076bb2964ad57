use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::locale::Locale;
use super::notice::LoginNotice;

const CAPTCHA_THRESHOLD: u32 = 3;
const LOCKOUT_THRESHOLD: u32 = 5;
const LOCKOUT_ESCALATION: [Duration; 5] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
    Duration::from_secs(300),
    Duration::from_secs(600),
];

const TWO_FACTOR_THROTTLE_THRESHOLD: u32 = 3;
const TWO_FACTOR_LOCKOUT_THRESHOLD: u32 = 5;
const TWO_FACTOR_LOCKOUT: Duration = Duration::from_secs(5 * 60);
pub const TWO_FACTOR_THROTTLE_DELAY: Duration = Duration::from_secs(3);

/// Values read once from the hosting page when a login flow is mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSeed {
    pub prefilled_username: Option<String>,
    pub force_two_factor: bool,
    pub oauth_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStep {
    Credentials,
    TwoFactor,
    Authenticated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptState {
    pub failed_login_attempts: u32,
    pub failed_two_factor_attempts: u32,
    pub show_captcha: bool,
    pub block_end_time: Option<DateTime<Utc>>,
    pub blocked: bool,
    pub busy: bool,
    pub show_two_factor: bool,
    pub authenticated: bool,
    pub last_error_message: String,
    pub last_notice: Option<LoginNotice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCheck {
    pub blocked: bool,
    pub message: Option<String>,
}

/// Handle for a pending 2FA throttle clear.
///
/// Firing a ticket only clears `busy`, and only if no newer throttle or reset
/// happened since it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleTicket {
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoFactorFailure {
    pub forced_return_to_login: bool,
    /// The flow was bound to an OAuth token; the caller must navigate to
    /// `/login` instead of resetting in place.
    pub restart_flow: bool,
    pub throttle: Option<ThrottleTicket>,
}

/// Read-only view used to render the form and the countdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptSnapshot {
    pub step: LoginStep,
    pub message: Option<String>,
    pub show_captcha: bool,
    pub submit_disabled: bool,
    pub remaining_seconds: Option<u64>,
    pub busy: bool,
}

/// Client-side brute-force mitigation for one login page session.
///
/// This is a UX throttle, not a security boundary. It only decides whether a
/// submission may reach the auth backend and what to tell the user.
#[derive(Debug, Clone)]
pub struct LoginAttemptPolicy {
    state: AttemptState,
    seed: SessionSeed,
    locale: Locale,
    throttle_epoch: u64,
}

impl LoginAttemptPolicy {
    pub fn new(seed: SessionSeed, locale: Locale) -> Self {
        let state = AttemptState {
            show_two_factor: seed.force_two_factor || seed.oauth_token.is_some(),
            ..AttemptState::default()
        };
        LoginAttemptPolicy {
            state,
            seed,
            locale,
            throttle_epoch: 0,
        }
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn seed(&self) -> &SessionSeed {
        &self.seed
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn step(&self) -> LoginStep {
        if self.state.authenticated {
            LoginStep::Authenticated
        } else if self.state.show_two_factor {
            LoginStep::TwoFactor
        } else {
            LoginStep::Credentials
        }
    }

    /// Must be consulted before every submission.
    pub fn check_blocked(&mut self, now: DateTime<Utc>) -> BlockCheck {
        match self.remaining_block_seconds(now) {
            Some(remaining_seconds) => {
                let notice = LoginNotice::TemporarilyBlocked { remaining_seconds };
                self.state.blocked = true;
                self.set_notice(notice);
                BlockCheck {
                    blocked: true,
                    message: Some(self.state.last_error_message.clone()),
                }
            }
            None => {
                self.state.blocked = false;
                BlockCheck {
                    blocked: false,
                    message: None,
                }
            }
        }
    }

    pub fn record_failed_login(&mut self, now: DateTime<Utc>) -> &AttemptState {
        self.state.failed_login_attempts = self.state.failed_login_attempts.saturating_add(1);
        let count = self.state.failed_login_attempts;

        if count >= CAPTCHA_THRESHOLD {
            self.state.show_captcha = true;
        }

        if count >= LOCKOUT_THRESHOLD {
            let index = ((count - LOCKOUT_THRESHOLD) as usize).min(LOCKOUT_ESCALATION.len() - 1);
            let duration = LOCKOUT_ESCALATION[index];
            self.state.block_end_time = Some(deadline(now, duration));
            self.state.blocked = true;
            let seconds = (duration.as_millis() as u64).div_ceil(1000);
            tracing::warn!(
                "Login locked out for {}s after {} failed attempts",
                seconds,
                count
            );
            self.set_notice(LoginNotice::LockedOut { seconds });
        } else if count >= CAPTCHA_THRESHOLD {
            self.set_notice(LoginNotice::CaptchaRequired);
        } else {
            self.set_notice(LoginNotice::InvalidCredentials);
        }

        &self.state
    }

    pub fn record_failed_two_factor(&mut self, now: DateTime<Utc>) -> TwoFactorFailure {
        self.state.failed_two_factor_attempts =
            self.state.failed_two_factor_attempts.saturating_add(1);
        let count = self.state.failed_two_factor_attempts;

        if count >= TWO_FACTOR_LOCKOUT_THRESHOLD {
            self.state.block_end_time = Some(deadline(now, TWO_FACTOR_LOCKOUT));
            self.state.blocked = true;
            self.state.show_two_factor = false;
            self.state.busy = false;
            self.throttle_epoch += 1;
            self.set_notice(LoginNotice::TwoFactorLockedOut);
            let restart_flow = self.seed.oauth_token.is_some();
            tracing::warn!(
                "Two-factor locked out after {} failed attempts (oauth={})",
                count,
                restart_flow
            );
            return TwoFactorFailure {
                forced_return_to_login: true,
                restart_flow,
                throttle: None,
            };
        }

        if count >= TWO_FACTOR_THROTTLE_THRESHOLD {
            self.state.busy = true;
            self.throttle_epoch += 1;
            self.set_notice(LoginNotice::TwoFactorThrottled);
            return TwoFactorFailure {
                forced_return_to_login: false,
                restart_flow: false,
                throttle: Some(ThrottleTicket {
                    epoch: self.throttle_epoch,
                }),
            };
        }

        self.set_notice(LoginNotice::InvalidTwoFactorCode);
        TwoFactorFailure {
            forced_return_to_login: false,
            restart_flow: false,
            throttle: None,
        }
    }

    /// Deferred end of a 2FA throttle. Touches nothing but `busy`.
    pub fn clear_throttle(&mut self, ticket: ThrottleTicket) {
        if ticket.epoch == self.throttle_epoch {
            self.state.busy = false;
        }
    }

    /// The backend accepted the password and asked for a second factor.
    /// The 2FA counter carries over from an earlier step that ended in a
    /// lockout.
    pub fn enter_two_factor(&mut self) {
        self.state.show_two_factor = true;
        self.clear_message();
    }

    /// Explicit "back to login". Login-scoped counters survive.
    pub fn return_to_login(&mut self) {
        self.state.failed_two_factor_attempts = 0;
        self.state.show_two_factor = false;
        self.state.busy = false;
        self.throttle_epoch += 1;
        if matches!(
            self.state.last_notice,
            Some(
                LoginNotice::InvalidTwoFactorCode
                    | LoginNotice::TwoFactorThrottled
                    | LoginNotice::TwoFactorLockedOut
            )
        ) {
            self.clear_message();
        }
    }

    pub fn record_success(&mut self) {
        self.state = AttemptState {
            authenticated: true,
            ..AttemptState::default()
        };
        self.throttle_epoch += 1;
    }

    /// Pure read for rendering and the countdown refresh.
    pub fn snapshot(&self, now: DateTime<Utc>) -> AttemptSnapshot {
        let remaining_seconds = self.remaining_block_seconds(now);
        let message = match remaining_seconds {
            // Keep the reason for a lockout that just started.
            Some(_)
                if matches!(
                    self.state.last_notice,
                    Some(LoginNotice::LockedOut { .. } | LoginNotice::TwoFactorLockedOut)
                ) =>
            {
                Some(self.state.last_error_message.clone())
            }
            Some(remaining_seconds) => Some(
                LoginNotice::TemporarilyBlocked { remaining_seconds }.message(self.locale),
            ),
            // An elapsed lockout message would only be misleading.
            None if self.state.last_notice.is_some_and(|n| n.is_blocking()) => None,
            None if self.state.last_error_message.is_empty() => None,
            None => Some(self.state.last_error_message.clone()),
        };
        AttemptSnapshot {
            step: self.step(),
            message,
            show_captcha: self.state.show_captcha,
            submit_disabled: remaining_seconds.is_some() || self.state.busy,
            remaining_seconds,
            busy: self.state.busy,
        }
    }

    fn remaining_block_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let end = self.state.block_end_time?;
        if now < end {
            let millis = (end - now).num_milliseconds().max(0) as u64;
            Some(millis.div_ceil(1000).max(1))
        } else {
            None
        }
    }

    fn set_notice(&mut self, notice: LoginNotice) {
        self.state.last_error_message = notice.message(self.locale);
        self.state.last_notice = Some(notice);
    }

    fn clear_message(&mut self) {
        self.state.last_error_message.clear();
        self.state.last_notice = None;
    }
}

fn deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now + TimeDelta::milliseconds(duration.as_millis() as i64)
}
