//! C6 Security & Privacy Guards: PII detection and redaction.
//!
//! Scans free text (user utterances, tool outputs, anything about to cross
//! a trust boundary — logs, the realtime provider, analytics events) for a
//! fixed set of PII patterns and replaces each match with a typed
//! placeholder from [`voice_agent_core::PIIType::placeholder`].

use once_cell::sync::Lazy;
use regex::Regex;
use voice_agent_core::{PIIEntity, PIISeverity, PIIType};

struct Pattern {
    pii_type: PIIType,
    severity: PIISeverity,
    regex: &'static Lazy<Regex>,
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap());
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CREDIT_CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]*?){13,16}\b").unwrap());
static API_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bsk-[A-Za-z0-9]{16,}\b").unwrap());
static BEARER_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9\-_.]{10,}\b").unwrap());
static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static PERSONAL_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s]*/(?:users|profile|account)/[A-Za-z0-9_-]+").unwrap());

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern { pii_type: PIIType::Email, severity: PIISeverity::Medium, regex: &EMAIL_RE },
        Pattern { pii_type: PIIType::BearerToken, severity: PIISeverity::High, regex: &BEARER_TOKEN_RE },
        Pattern { pii_type: PIIType::ApiToken, severity: PIISeverity::High, regex: &API_TOKEN_RE },
        Pattern { pii_type: PIIType::Ssn, severity: PIISeverity::High, regex: &SSN_RE },
        Pattern { pii_type: PIIType::CreditCard, severity: PIISeverity::High, regex: &CREDIT_CARD_RE },
        Pattern { pii_type: PIIType::Phone, severity: PIISeverity::Medium, regex: &PHONE_RE },
        Pattern { pii_type: PIIType::PersonalUrl, severity: PIISeverity::Low, regex: &PERSONAL_URL_RE },
        Pattern { pii_type: PIIType::IpAddress, severity: PIISeverity::Low, regex: &IP_RE },
    ]
});

/// Detects PII spans in `text`, highest-severity pattern wins when spans
/// overlap (e.g. a bearer token also matching the looser credit-card digit
/// run).
pub fn detect(text: &str) -> Vec<PIIEntity> {
    let mut found: Vec<PIIEntity> = Vec::new();
    for pattern in PATTERNS.iter() {
        for m in pattern.regex.find_iter(text) {
            let span = (m.start(), m.end());
            let overlaps = found.iter().any(|e| spans_overlap(e.span, span));
            if !overlaps {
                found.push(PIIEntity { pii_type: pattern.pii_type, severity: pattern.severity, span });
            }
        }
    }
    found.sort_by_key(|e| e.span.0);
    found
}

fn spans_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Replaces every detected PII span with its typed placeholder, returning
/// the redacted text alongside what was found (for the privacy audit ring).
pub fn redact(text: &str) -> (String, Vec<PIIEntity>) {
    let entities = detect(text);
    if entities.is_empty() {
        return (text.to_string(), entities);
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for entity in &entities {
        out.push_str(&text[cursor..entity.span.0]);
        out.push_str(entity.pii_type.placeholder());
        cursor = entity.span.1;
    }
    out.push_str(&text[cursor..]);
    (out, entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email() {
        let (redacted, entities) = redact("contact me at jane@example.com please");
        assert_eq!(redacted, "contact me at [REDACTED_EMAIL] please");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].pii_type, PIIType::Email);
    }

    #[test]
    fn redacts_bearer_token_before_generic_digit_run() {
        let (redacted, entities) = redact("Authorization: Bearer abcdef0123456789xyz");
        assert!(redacted.contains("[REDACTED_TOKEN]"));
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn leaves_clean_text_untouched() {
        let (redacted, entities) = redact("I'd like to book an appointment for tomorrow");
        assert!(entities.is_empty());
        assert_eq!(redacted, "I'd like to book an appointment for tomorrow");
    }

    #[test]
    fn non_overlapping_entities_preserve_order() {
        let (_, entities) = redact("reach jane@example.com or 555-123-4567");
        assert!(entities.windows(2).all(|w| w[0].span.0 <= w[1].span.0));
    }
}
