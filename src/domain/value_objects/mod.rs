use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::models::MessageError;

pub const MIN_PHONE_DIGITS: usize = 10;
pub const MAX_PHONE_DIGITS: usize = 15;
/// Longest stored phone number, separators included. Matches the column width.
pub const MAX_PHONE_LENGTH: usize = 32;
/// SMS character limit.
pub const MAX_CONTENT_LENGTH: usize = 160;

/// Recipient phone number in international format.
///
/// Spaces, hyphens and parentheses are ignored while validating; the stored
/// value is the trimmed input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn new(raw: impl Into<String>) -> Result<Self, MessageError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MessageError::validation("phone number cannot be empty"));
        }
        if trimmed.chars().count() > MAX_PHONE_LENGTH {
            return Err(MessageError::validation(format!(
                "phone number cannot exceed {MAX_PHONE_LENGTH} characters"
            )));
        }

        let cleaned: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
            .collect();
        let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(MessageError::validation("invalid phone number format"));
        }
        if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
            return Err(MessageError::validation(format!(
                "phone number must be between {MIN_PHONE_DIGITS} and {MAX_PHONE_DIGITS} digits"
            )));
        }
        if digits.starts_with('0') {
            return Err(MessageError::validation("invalid phone number format"));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message body, 1 to 160 characters once surrounding whitespace is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Content(String);

impl Content {
    pub fn new(raw: impl Into<String>) -> Result<Self, MessageError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MessageError::validation("message content cannot be empty"));
        }
        if trimmed.chars().count() > MAX_CONTENT_LENGTH {
            return Err(MessageError::validation(format!(
                "message content exceeds maximum length of {MAX_CONTENT_LENGTH} characters"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Character count, not byte length.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl TryFrom<String> for Content {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Content> for String {
    fn from(value: Content) -> Self {
        value.0
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
