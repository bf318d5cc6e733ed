//! PII taxonomy shared between the security crate's detector and any code
//! that needs to talk about PII types without depending on the detector
//! implementation itself (e.g. audit entries, analytics event shaping).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PIIType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    ApiToken,
    BearerToken,
    IpAddress,
    PersonalUrl,
}

impl PIIType {
    pub fn placeholder(&self) -> &'static str {
        match self {
            PIIType::Email => "[REDACTED_EMAIL]",
            PIIType::Phone => "[REDACTED_PHONE]",
            PIIType::Ssn => "[REDACTED_SSN]",
            PIIType::CreditCard => "[REDACTED_CARD]",
            PIIType::ApiToken => "[REDACTED_TOKEN]",
            PIIType::BearerToken => "[REDACTED_TOKEN]",
            PIIType::IpAddress => "[REDACTED_IP]",
            PIIType::PersonalUrl => "[REDACTED_URL]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PIISeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PIIEntity {
    pub pii_type: PIIType,
    pub severity: PIISeverity,
    pub span: (usize, usize),
}
