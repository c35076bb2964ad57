use serde::Serialize;

use super::locale::Locale;

/// Outcome shown to the user after a gated or failed submission.
///
/// None of these are errors in the Rust sense; the login controller renders
/// them next to the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoginNotice {
    InvalidCredentials,
    InvalidTwoFactorCode,
    CaptchaRequired,
    /// Lockout just started; `seconds` is the full window.
    LockedOut { seconds: u64 },
    TemporarilyBlocked { remaining_seconds: u64 },
    TwoFactorThrottled,
    TwoFactorLockedOut,
}

impl LoginNotice {
    pub fn message(&self, locale: Locale) -> String {
        match locale {
            Locale::Ko => self.message_ko(),
            Locale::En => self.message_en(),
        }
    }

    /// Whether the submit button must stay disabled while this notice is shown.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            LoginNotice::LockedOut { .. }
                | LoginNotice::TemporarilyBlocked { .. }
                | LoginNotice::TwoFactorLockedOut
        )
    }

    fn message_ko(&self) -> String {
        match self {
            LoginNotice::InvalidCredentials => "아이디 또는 비밀번호가 올바르지 않습니다.".to_string(),
            LoginNotice::InvalidTwoFactorCode => "인증 코드가 올바르지 않습니다.".to_string(),
            LoginNotice::CaptchaRequired => "보안 확인을 완료한 뒤 다시 시도해주세요.".to_string(),
            LoginNotice::LockedOut { seconds } => format!(
                "로그인에 여러 번 실패하여 {}초 동안 로그인이 제한됩니다.",
                seconds
            ),
            LoginNotice::TemporarilyBlocked { remaining_seconds } => format!(
                "로그인 시도가 너무 많습니다. {}초 후에 다시 시도해주세요.",
                remaining_seconds
            ),
            LoginNotice::TwoFactorThrottled => "잠시 후 다시 시도해주세요.".to_string(),
            LoginNotice::TwoFactorLockedOut => {
                "2단계 인증에 여러 번 실패했습니다. 5분 후에 다시 로그인해주세요.".to_string()
            }
        }
    }

    fn message_en(&self) -> String {
        match self {
            LoginNotice::InvalidCredentials => "Invalid username or password.".to_string(),
            LoginNotice::InvalidTwoFactorCode => "Invalid verification code.".to_string(),
            LoginNotice::CaptchaRequired => {
                "Please complete the security check and try again.".to_string()
            }
            LoginNotice::LockedOut { seconds } => format!(
                "Too many failed attempts. Login is disabled for {} seconds.",
                seconds
            ),
            LoginNotice::TemporarilyBlocked { remaining_seconds } => format!(
                "Too many failed attempts. Please try again in {} seconds.",
                remaining_seconds
            ),
            LoginNotice::TwoFactorThrottled => "Please wait a moment and try again.".to_string(),
            LoginNotice::TwoFactorLockedOut => {
                "Too many failed verification attempts. Please sign in again in 5 minutes."
                    .to_string()
            }
        }
    }
}
