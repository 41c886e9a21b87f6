//! Common types for Outreach

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for tenants
pub type TenantId = Uuid;

/// Unique identifier for send settings
pub type SendSettingId = Uuid;

/// Unique identifier for active messages (send attempts)
pub type ActiveMessageId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for status rows
pub type StatusId = Uuid;

/// Identifier of a conversation in the external conversation store
pub type ConversationId = String;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Country calling code assumed for numbers submitted without one
pub const DEFAULT_COUNTRY_CODE: &str = "55";

/// Destination phone number.
///
/// Stored in canonical form: digits only, country code included and, for
/// mobile numbers that carry one, the leading ninth digit present. Providers
/// deliver inbound events with or without that digit, so lookups go through
/// [`PhoneNumber::variants`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse and normalize a phone number
    pub fn parse(raw: &str) -> Option<Self> {
        let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.len() == 10 || digits.len() == 11 {
            digits = format!("{}{}", DEFAULT_COUNTRY_CODE, digits);
        }

        if !(10..=15).contains(&digits.len()) {
            return None;
        }

        // 55 + area code (2) + 8 digit subscriber: add the mobile ninth digit
        if digits.len() == 12 && digits.starts_with(DEFAULT_COUNTRY_CODE) && is_mobile(&digits[4..])
        {
            digits.insert(4, '9');
        }

        Some(Self(digits))
    }

    /// Canonical digits
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Spelling with the leading mobile digit (the canonical form)
    pub fn with_leading_digit(&self) -> String {
        self.0.clone()
    }

    /// Spelling without the leading mobile digit, when the number has one
    pub fn without_leading_digit(&self) -> Option<String> {
        let d = &self.0;
        if d.len() == 13 && d.starts_with(DEFAULT_COUNTRY_CODE) && d.as_bytes()[4] == b'9' {
            let mut short = d.clone();
            short.remove(4);
            Some(short)
        } else {
            None
        }
    }

    /// All spellings under which this number may show up, canonical first
    pub fn variants(&self) -> Vec<String> {
        let mut variants = vec![self.with_leading_digit()];
        if let Some(short) = self.without_leading_digit() {
            variants.push(short);
        }
        variants
    }
}

/// Brazilian mobile subscriber numbers start with 6-9
fn is_mobile(subscriber: &str) -> bool {
    matches!(subscriber.as_bytes().first(), Some(b'6'..=b'9'))
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::Validation(format!("Invalid phone number: {}", s)))
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.0
    }
}

/// Statuses with a fixed meaning shared by every tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalStatus {
    InvalidNumber,
    OpenConversation,
    ChannelDisabled,
    MessageSent,
}

impl GlobalStatus {
    /// Reserved negative code stored in the statuses table
    pub fn code(&self) -> i32 {
        match self {
            GlobalStatus::InvalidNumber => -1,
            GlobalStatus::OpenConversation => -2,
            GlobalStatus::ChannelDisabled => -3,
            GlobalStatus::MessageSent => -4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(GlobalStatus::InvalidNumber),
            -2 => Some(GlobalStatus::OpenConversation),
            -3 => Some(GlobalStatus::ChannelDisabled),
            -4 => Some(GlobalStatus::MessageSent),
            _ => None,
        }
    }

    /// Whether the status ends the send without anything reaching the user
    pub fn is_terminal_failure(&self) -> bool {
        !matches!(self, GlobalStatus::MessageSent)
    }
}

impl std::fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalStatus::InvalidNumber => write!(f, "invalid_number"),
            GlobalStatus::OpenConversation => write!(f, "open_conversation"),
            GlobalStatus::ChannelDisabled => write!(f, "channel_disabled"),
            GlobalStatus::MessageSent => write!(f, "message_sent"),
        }
    }
}

/// Reference to a status row, either global or tenant-defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum StatusRef {
    Global { status: GlobalStatus },
    Tenant { tenant_id: TenantId, code: i32 },
}

impl StatusRef {
    pub fn global(status: GlobalStatus) -> Self {
        StatusRef::Global { status }
    }

    /// Interpret a raw status code reported by a tenant integration.
    ///
    /// Negative codes are only accepted when they name a known global status.
    pub fn from_code(tenant_id: TenantId, code: i32) -> Option<Self> {
        if code < 0 {
            GlobalStatus::from_code(code).map(Self::global)
        } else {
            Some(StatusRef::Tenant { tenant_id, code })
        }
    }

    /// Numeric code as stored
    pub fn code(&self) -> i32 {
        match self {
            StatusRef::Global { status } => status.code(),
            StatusRef::Tenant { code, .. } => *code,
        }
    }
}

/// Unit of a policy duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeUnit::Minutes => write!(f, "minutes"),
            TimeUnit::Hours => write!(f, "hours"),
            TimeUnit::Days => write!(f, "days"),
        }
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minutes" => Ok(TimeUnit::Minutes),
            "hours" => Ok(TimeUnit::Hours),
            "days" => Ok(TimeUnit::Days),
            _ => Err(format!("Invalid time unit: {}", s)),
        }
    }
}

/// Relative duration configured on a send setting (value + unit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDuration {
    pub value: i64,
    pub unit: TimeUnit,
}

impl PolicyDuration {
    pub fn new(value: i64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// `None` when the value does not fit a duration
    pub fn to_duration(&self) -> Option<Duration> {
        match self.unit {
            TimeUnit::Minutes => Duration::try_minutes(self.value),
            TimeUnit::Hours => Duration::try_hours(self.value),
            TimeUnit::Days => Duration::try_days(self.value),
        }
    }

    /// Absolute deadline counted from `from`, `None` past the calendar range
    pub fn deadline_from(&self, from: Timestamp) -> Option<Timestamp> {
        from.checked_add_signed(self.to_duration()?)
    }
}

/// Named value supplied to templates and stored on conversations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Where a send request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendOrigin {
    Api,
    Campaign { campaign_id: CampaignId },
}

impl SendOrigin {
    pub fn campaign_id(&self) -> Option<CampaignId> {
        match self {
            SendOrigin::Campaign { campaign_id } => Some(*campaign_id),
            SendOrigin::Api => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_phone_adds_country_code_and_ninth_digit() {
        let phone = PhoneNumber::parse("(11) 8765-4321").unwrap();
        assert_eq!(phone.as_str(), "5511987654321");
        assert_eq!(
            phone.variants(),
            vec!["5511987654321".to_string(), "551187654321".to_string()]
        );
    }

    #[test]
    fn test_phone_keeps_ninth_digit() {
        let phone = PhoneNumber::parse("+55 11 98765-4321").unwrap();
        assert_eq!(phone.as_str(), "5511987654321");
        assert_eq!(phone.without_leading_digit().as_deref(), Some("551187654321"));
    }

    #[test]
    fn test_landline_has_single_variant() {
        let phone = PhoneNumber::parse("551133334444").unwrap();
        assert_eq!(phone.variants(), vec!["551133334444".to_string()]);
    }

    #[test]
    fn test_phone_rejects_garbage() {
        assert!(PhoneNumber::parse("123").is_none());
        assert!(PhoneNumber::parse("not a number").is_none());
        assert!("1234567890123456".parse::<PhoneNumber>().is_err());
    }

    #[test]
    fn test_status_ref_from_code() {
        let tenant = Uuid::new_v4();
        assert_eq!(
            StatusRef::from_code(tenant, -1),
            Some(StatusRef::global(GlobalStatus::InvalidNumber))
        );
        assert_eq!(
            StatusRef::from_code(tenant, 3),
            Some(StatusRef::Tenant { tenant_id: tenant, code: 3 })
        );
        assert_eq!(StatusRef::from_code(tenant, -99), None);
    }

    #[test]
    fn test_policy_duration_deadline() {
        let now = Utc::now();
        let policy = PolicyDuration::new(2, TimeUnit::Days);
        assert_eq!(policy.deadline_from(now), Some(now + Duration::days(2)));
    }

    #[test]
    fn test_policy_duration_out_of_range() {
        let now = Utc::now();
        assert_eq!(PolicyDuration::new(i64::MAX, TimeUnit::Days).to_duration(), None);
        assert_eq!(PolicyDuration::new(i64::MAX, TimeUnit::Minutes).deadline_from(now), None);
        // representable as a duration, past the calendar
        assert_eq!(PolicyDuration::new(200_000_000, TimeUnit::Days).deadline_from(now), None);
    }
}
