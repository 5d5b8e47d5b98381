use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identifier: {0:?}")]
pub struct InvalidIdentifier(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Isin,
    BseCode,
    NseSymbol,
    CompanyName,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IdentifierKind::Isin => "isin",
            IdentifierKind::BseCode => "bse_code",
            IdentifierKind::NseSymbol => "nse_symbol",
            IdentifierKind::CompanyName => "company_name",
        };
        f.write_str(label)
    }
}

/// A classified lookup key. Codes are upper-cased, name fragments lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedIdentifier {
    pub kind: IdentifierKind,
    pub key: String,
}

fn isin_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{2}[A-Z0-9]{9}[0-9]$").expect("valid ISIN regex"))
}

fn nse_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9&\-]{1,20}$").expect("valid NSE symbol regex"))
}

/// Strip whitespace and a single layer of surrounding quotes.
pub fn clean_fragment(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

pub fn is_isin(value: &str) -> bool {
    isin_pattern().is_match(value)
}

/// Classify a raw identifier. ISIN wins over a numeric BSE code, which wins
/// over an NSE symbol; anything else alphanumeric is a name fragment.
pub fn normalize(raw: &str) -> Result<NormalizedIdentifier, InvalidIdentifier> {
    let cleaned = clean_fragment(raw);
    if cleaned.is_empty() || !cleaned.chars().any(char::is_alphanumeric) {
        return Err(InvalidIdentifier(raw.to_string()));
    }

    let upper = cleaned.to_uppercase();

    if is_isin(&upper) {
        return Ok(NormalizedIdentifier { kind: IdentifierKind::Isin, key: upper });
    }

    if upper.len() <= 10 && upper.chars().all(|c| c.is_ascii_digit()) {
        return Ok(NormalizedIdentifier { kind: IdentifierKind::BseCode, key: upper });
    }

    if nse_pattern().is_match(&upper) && upper.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(NormalizedIdentifier { kind: IdentifierKind::NseSymbol, key: upper });
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(NormalizedIdentifier {
        kind: IdentifierKind::CompanyName,
        key: collapsed.to_lowercase(),
    })
}
