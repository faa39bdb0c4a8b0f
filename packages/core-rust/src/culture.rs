//! Culture tags and culture-sensitive formatting.
//!
//! A [`Culture`] is a plain value. It is carried inside each message's
//! [`ExecutionContext`](crate::ExecutionContext) and passed explicitly to
//! formatting calls, so two messages processed at the same time can never
//! observe each other's culture.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

/// `language[-REGION]`, with `_` accepted as separator. Region is either two
/// letters or a three-digit UN M.49 code.
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<lang>[A-Za-z]{2,3})(?:[-_](?P<region>[A-Za-z]{2}|[0-9]{3}))?$")
        .expect("culture tag pattern is valid")
});

const INVARIANT_NAME: &str = "invariant";

/// A validated culture tag such as `en`, `pt-BR` or `de-CH`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Culture {
    language: String,
    region: Option<String>,
}

/// Error returned when a string is not a usable culture tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid culture tag: {tag:?}")]
pub struct CultureParseError {
    pub tag: String,
}

impl Culture {
    /// The process default culture: `.` decimal separator, `,` grouping.
    #[must_use]
    pub fn invariant() -> Self {
        Self {
            language: String::new(),
            region: None,
        }
    }

    #[must_use]
    pub fn is_invariant(&self) -> bool {
        self.language.is_empty()
    }

    /// Lower-case language subtag. Empty for the invariant culture.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Upper-case region subtag, if any.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Decimal and group separators used by this culture.
    #[must_use]
    pub fn separators(&self) -> (char, char) {
        match (self.language.as_str(), self.region()) {
            ("de" | "it" | "fr", Some("CH")) | (_, Some("LI")) => ('.', '\''),
            ("es", Some("MX" | "US")) => ('.', ','),
            (
                "pt" | "de" | "es" | "it" | "nl" | "id" | "tr" | "da" | "el" | "ro" | "hr" | "sl",
                _,
            ) => (',', '.'),
            (
                "fr" | "ru" | "pl" | "cs" | "sk" | "sv" | "nb" | "no" | "fi" | "uk" | "hu" | "bg",
                _,
            ) => (',', '\u{a0}'),
            _ => ('.', ','),
        }
    }

    /// Formats `value` with `decimals` fractional digits using this culture's
    /// separators, e.g. `1234.5` as `1.234,50` for `pt-BR`.
    #[must_use]
    pub fn format_decimal(&self, value: f64, decimals: usize) -> String {
        if !value.is_finite() {
            return value.to_string();
        }

        let (decimal_sep, group_sep) = self.separators();
        let rendered = format!("{:.*}", decimals, value.abs());
        let (int_part, frac_part) = match rendered.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (rendered.as_str(), None),
        };

        let mut out = String::with_capacity(rendered.len() + int_part.len() / 3 + 1);
        let negative = value.is_sign_negative()
            && rendered.bytes().any(|b| b.is_ascii_digit() && b != b'0');
        if negative {
            out.push('-');
        }
        for (i, digit) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                out.push(group_sep);
            }
            out.push(digit);
        }
        if let Some(frac) = frac_part {
            out.push(decimal_sep);
            out.push_str(frac);
        }
        out
    }
}

impl Default for Culture {
    fn default() -> Self {
        Self::invariant()
    }
}

impl FromStr for Culture {
    type Err = CultureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case(INVARIANT_NAME) {
            return Ok(Self::invariant());
        }
        let caps = TAG_PATTERN.captures(trimmed).ok_or_else(|| CultureParseError {
            tag: s.to_string(),
        })?;
        Ok(Self {
            language: caps["lang"].to_ascii_lowercase(),
            region: caps.name("region").map(|r| r.as_str().to_ascii_uppercase()),
        })
    }
}

impl fmt::Display for Culture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invariant() {
            return f.write_str(INVARIANT_NAME);
        }
        match &self.region {
            Some(region) => write!(f, "{}-{}", self.language, region),
            None => f.write_str(&self.language),
        }
    }
}
