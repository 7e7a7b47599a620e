//! The two UI languages and the few strings the client itself produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[serde(alias = "arabic")]
    Ar,
    #[default]
    #[serde(alias = "english")]
    En,
}

impl Locale {
    pub fn code(&self) -> &'static str {
        match self {
            Locale::Ar => "ar",
            Locale::En => "en",
        }
    }

    /// Shown when a failure carries no usable message of its own.
    pub fn generic_error(&self) -> &'static str {
        match self {
            Locale::Ar => "حدث خطأ ما. يرجى المحاولة مرة أخرى.",
            Locale::En => "Something went wrong. Please try again.",
        }
    }

    pub fn session_expired(&self) -> &'static str {
        match self {
            Locale::Ar => "انتهت صلاحية الجلسة. يرجى تسجيل الدخول مرة أخرى.",
            Locale::En => "Your session has expired. Please sign in again.",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    /// Accepts bare codes and region-tagged ones like `ar-SA` or `en_US`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = s
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match lang.as_str() {
            "ar" | "arabic" => Ok(Locale::Ar),
            "en" | "english" => Ok(Locale::En),
            _ => Err(format!("unsupported locale: {}", s)),
        }
    }
}
