//! Validated value types shared across the care workspace.
//!
//! Every type here checks its invariant once, at construction, so downstream code can take the
//! value as given.

mod page;

pub use page::Page;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is not a phone number in international form
    #[error("invalid phone number: {0}")]
    InvalidMsisdn(String),

    /// The input is not a one-time passcode
    #[error("one-time passcode must be 4 to 8 digits")]
    InvalidOtp,
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the input is empty or contains only whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A mobile subscriber number (MSISDN).
///
/// Accepted input is an optional leading `+` followed by 7 to 15 digits. Spaces and hyphens are
/// stripped before validation, so `+44 7700-900123` and `+447700900123` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Msisdn(String);

impl Msisdn {
    /// Parse and normalise a phone number.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::InvalidMsisdn`] if the number has the wrong length or contains
    /// anything other than digits after normalisation.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let raw = input.as_ref().trim();
        let normalised: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();
        let digits = normalised.strip_prefix('+').unwrap_or(&normalised);

        if !(7..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(TextError::InvalidMsisdn(raw.to_owned()));
        }

        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Msisdn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for Msisdn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Msisdn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Msisdn::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A one-time passcode as typed by a user: 4 to 8 ASCII digits.
///
/// `Debug` is redacted so passcodes never reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Otp(String);

impl Otp {
    /// # Errors
    ///
    /// Returns [`TextError::InvalidOtp`] unless the trimmed input is 4 to 8 digits.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if !(4..=8).contains(&trimmed.len()) || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(TextError::InvalidOtp);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Otp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Otp(****)")
    }
}

impl<'de> serde::Deserialize<'de> for Otp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Otp::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_and_rejects_blank() {
        assert_eq!(NonEmptyText::new("  Ward 3 ").unwrap().as_str(), "Ward 3");
        assert_eq!(NonEmptyText::new("   "), Err(TextError::Empty));
    }

    #[test]
    fn msisdn_normalises_separators() {
        let a = Msisdn::parse("+44 7700-900123").unwrap();
        let b = Msisdn::parse("+447700900123").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "+447700900123");
    }

    #[test]
    fn msisdn_rejects_letters_and_bad_lengths() {
        assert!(matches!(
            Msisdn::parse("07700abc123"),
            Err(TextError::InvalidMsisdn(_))
        ));
        assert!(Msisdn::parse("+12345").is_err());
        assert!(Msisdn::parse("1234567890123456").is_err());
    }

    #[test]
    fn otp_requires_four_to_eight_digits() {
        assert!(Otp::parse("1234").is_ok());
        assert!(Otp::parse("12345678").is_ok());
        assert_eq!(Otp::parse("123"), Err(TextError::InvalidOtp));
        assert_eq!(Otp::parse("12a4"), Err(TextError::InvalidOtp));
    }

    #[test]
    fn otp_debug_is_redacted() {
        let otp = Otp::parse("987654").unwrap();
        assert_eq!(format!("{otp:?}"), "Otp(****)");
    }

    #[test]
    fn msisdn_deserialise_validates() {
        let ok: Msisdn = serde_json::from_str("\"+8801711000000\"").unwrap();
        assert_eq!(ok.as_str(), "+8801711000000");
        assert!(serde_json::from_str::<Msisdn>("\"not a phone\"").is_err());
    }
}
