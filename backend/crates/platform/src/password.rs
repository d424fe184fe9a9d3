//! Clear-Text Password Handling
//!
//! Passwords typed into a form live only as long as the request that carries
//! them to the hosted auth service. This module validates them before any
//! network call and erases them from memory afterwards.
//!
//! Two policies:
//! - **sign-in**: length bounds only; existing passwords are never rejected
//!   for being weak, the backend is the judge
//! - **new password** (signup, recovery, invite): NIST SP 800-63B style
//!   checks on top of the length bounds

use std::fmt;

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ============================================================================
// Constants
// ============================================================================

/// Minimum password length (NIST: SHALL be at least 8)
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length (NIST: SHOULD permit at least 64)
pub const MAX_PASSWORD_LENGTH: usize = 128;

// ============================================================================
// Error Types
// ============================================================================

/// Password policy violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordPolicyError {
    #[error("Password must be at least {min} characters")]
    TooShort { min: usize, actual: usize },

    #[error("Password must be at most {max} characters")]
    TooLong { max: usize, actual: usize },

    #[error("Password cannot be empty")]
    EmptyOrWhitespace,

    #[error("Password contains invalid control characters")]
    InvalidCharacter,

    #[error("Password is too common or follows a predictable pattern")]
    CommonPattern,
}

// ============================================================================
// Clear Text Password (Zeroized on drop)
// ============================================================================

/// Clear text password with automatic memory zeroization
///
/// - Implements `Zeroize` and `ZeroizeOnDrop`
/// - Does not implement `Clone` to prevent accidental copies
/// - Debug output is redacted
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ClearTextPassword(String);

impl ClearTextPassword {
    /// Validate a password typed into a sign-in form
    ///
    /// The text is kept exactly as typed; the remote service compares it
    /// byte for byte.
    pub fn for_sign_in(raw: String) -> Result<Self, PasswordPolicyError> {
        check_length(&raw)?;
        Ok(Self(raw))
    }

    /// Validate a password the user is choosing
    ///
    /// Checks run on a Unicode NFKC normalized copy, length counted in code
    /// points; the stored text is the one typed.
    /// - 8..=128 characters, not whitespace-only
    /// - No control characters (space, tab and newline are allowed)
    /// - No common, sequential or keyboard patterns
    pub fn new(raw: String) -> Result<Self, PasswordPolicyError> {
        check_length(&raw)?;

        let mut normalized = normalize(&raw);
        let verdict = check_policy(&normalized);
        normalized.zeroize();
        verdict?;

        Ok(Self(raw))
    }

    /// The password text, for the request body that carries it
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Constant-time equality, used for confirmation fields
    pub fn matches(&self, other: &ClearTextPassword) -> bool {
        crate::crypto::constant_time_eq(self.as_bytes(), other.as_bytes())
    }
}

impl fmt::Debug for ClearTextPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClearTextPassword")
            .field(&"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn normalize(raw: &str) -> String {
    // NIST: Unicode NFKC normalization before processing
    raw.nfkc().collect()
}

fn check_policy(normalized: &str) -> Result<(), PasswordPolicyError> {
    check_length(normalized)?;

    for ch in normalized.chars() {
        if ch.is_control() && ch != ' ' && ch != '\t' && ch != '\n' {
            return Err(PasswordPolicyError::InvalidCharacter);
        }
    }

    if is_common_pattern(normalized) {
        return Err(PasswordPolicyError::CommonPattern);
    }

    Ok(())
}

fn check_length(password: &str) -> Result<(), PasswordPolicyError> {
    if password.trim().is_empty() {
        return Err(PasswordPolicyError::EmptyOrWhitespace);
    }

    // NIST: count Unicode code points, not bytes
    let char_count = password.chars().count();

    if char_count < MIN_PASSWORD_LENGTH {
        return Err(PasswordPolicyError::TooShort {
            min: MIN_PASSWORD_LENGTH,
            actual: char_count,
        });
    }

    if char_count > MAX_PASSWORD_LENGTH {
        return Err(PasswordPolicyError::TooLong {
            max: MAX_PASSWORD_LENGTH,
            actual: char_count,
        });
    }

    Ok(())
}

/// Check for common weak patterns
fn is_common_pattern(password: &str) -> bool {
    let lower = password.to_lowercase();

    // All the same character (e.g. "aaaaaaaa")
    let mut chars = lower.chars();
    if let Some(first) = chars.next() {
        if chars.all(|c| c == first) {
            return true;
        }
    }

    if is_sequential_numbers(&lower) {
        return true;
    }

    const KEYBOARD_PATTERNS: &[&str] = &[
        "qwerty",
        "asdfgh",
        "zxcvbn",
        "qazwsx",
        "1qaz2wsx",
    ];

    if KEYBOARD_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }

    const COMMON_PASSWORDS: &[&str] = &[
        "password",
        "password1",
        "password123",
        "abcdefgh",
        "letmein1",
        "welcome1",
        "admin123",
        "iloveyou",
        "sunshine",
        "princess",
        "football",
        "baseball",
        "trustno1",
    ];

    COMMON_PASSWORDS.contains(&lower.as_str())
}

/// Only digits, strictly ascending or descending (wrapping 9→0)
fn is_sequential_numbers(s: &str) -> bool {
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() < 4 {
        return false;
    }

    let is_ascending = digits
        .windows(2)
        .all(|w| w[1] == w[0] + 1 || (w[0] == 9 && w[1] == 0));

    let is_descending = digits
        .windows(2)
        .all(|w| w[0] == w[1] + 1 || (w[0] == 0 && w[1] == 9));

    is_ascending || is_descending
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_too_short() {
        let result = ClearTextPassword::for_sign_in("short".to_string());
        assert!(matches!(
            result,
            Err(PasswordPolicyError::TooShort { min: 8, actual: 5 })
        ));
        assert_eq!(
            result.unwrap_err().to_string(),
            "Password must be at least 8 characters"
        );
    }

    #[test]
    fn test_password_too_long() {
        let long_password = "a".repeat(MAX_PASSWORD_LENGTH + 1);
        let result = ClearTextPassword::for_sign_in(long_password);
        assert!(matches!(result, Err(PasswordPolicyError::TooLong { .. })));
    }

    #[test]
    fn test_password_whitespace_only() {
        let result = ClearTextPassword::for_sign_in("        ".to_string());
        assert!(matches!(result, Err(PasswordPolicyError::EmptyOrWhitespace)));
    }

    #[test]
    fn test_sign_in_accepts_weak_but_long_enough() {
        // The backend decides whether an existing password is right
        assert!(ClearTextPassword::for_sign_in("password123".to_string()).is_ok());
        assert!(ClearTextPassword::for_sign_in("validpassword123".to_string()).is_ok());
    }

    #[test]
    fn test_new_password_common_pattern() {
        for weak in ["password123", "qwertyuiop", "12345678", "aaaaaaaaaa", "98765432"] {
            let result = ClearTextPassword::new(weak.to_string());
            assert!(
                matches!(result, Err(PasswordPolicyError::CommonPattern)),
                "{weak} should be rejected"
            );
        }
    }

    #[test]
    fn test_new_password_control_character() {
        let result = ClearTextPassword::new("abc\u{0007}defgh".to_string());
        assert!(matches!(result, Err(PasswordPolicyError::InvalidCharacter)));
    }

    #[test]
    fn test_valid_new_password() {
        assert!(ClearTextPassword::new("MySecure#Pass2024!".to_string()).is_ok());
        assert!(ClearTextPassword::new("validpassword123".to_string()).is_ok());
        assert!(ClearTextPassword::new("パスワード安全です!".to_string()).is_ok());
    }

    #[test]
    fn test_text_kept_as_typed() {
        // U+FB01 LATIN SMALL LIGATURE FI normalizes to "fi" under NFKC
        let typed = "\u{FB01}xedpassword1";
        let sign_in = ClearTextPassword::for_sign_in(typed.to_string()).unwrap();
        assert_eq!(sign_in.expose(), typed);

        let chosen = ClearTextPassword::new(format!("{typed}#Z")).unwrap();
        assert_eq!(chosen.expose(), format!("{typed}#Z"));
    }

    #[test]
    fn test_policy_sees_normalized_text() {
        // Fullwidth digits normalize to a plain ascending sequence
        let result = ClearTextPassword::new("\u{FF11}\u{FF12}\u{FF13}\u{FF14}\u{FF15}\u{FF16}\u{FF17}\u{FF18}".to_string());
        assert!(matches!(result, Err(PasswordPolicyError::CommonPattern)));
    }

    #[test]
    fn test_matches() {
        let a = ClearTextPassword::new("MySecure#Pass2024!".to_string()).unwrap();
        let b = ClearTextPassword::new("MySecure#Pass2024!".to_string()).unwrap();
        let c = ClearTextPassword::new("MySecure#Pass2025!".to_string()).unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_debug_redaction() {
        let password = ClearTextPassword::for_sign_in("secret-value".to_string()).unwrap();
        let debug_output = format!("{:?}", password);
        assert!(debug_output.contains("REDACTED"));
        assert!(!debug_output.contains("secret"));
    }
}
