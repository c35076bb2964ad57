use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ko,
    En,
}

impl Locale {
    pub fn from_code(code: &str) -> Result<Self, AppError> {
        match code.trim().to_lowercase().as_str() {
            "ko" | "ko-kr" => Ok(Locale::Ko),
            "en" | "en-us" | "en-gb" => Ok(Locale::En),
            _ => Err(AppError::BadRequest(format!(
                "Unsupported language code: '{}'. Supported: ko, en",
                code
            ))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Locale::Ko => "ko",
            Locale::En => "en",
        }
    }
}
