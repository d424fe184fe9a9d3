//! Password Value Objects
//!
//! Domain wrappers around `platform::password::ClearTextPassword`.
//! Memory is zeroized when dropped; nothing here is ever persisted.
//!
//! - [`RawPassword`]: a password typed into the sign-in form
//! - [`NewPassword`]: a password the user is choosing (signup, recovery,
//!   invite), checked against its confirmation field

use platform::password::ClearTextPassword;
use std::fmt;

use crate::error::ValidationError;

// ============================================================================
// Raw Password (sign-in)
// ============================================================================

/// Password from the sign-in form
///
/// Only length bounds are checked; whether it is the right one is for the
/// remote service to decide.
pub struct RawPassword(ClearTextPassword);

impl RawPassword {
    pub fn new(raw: String) -> Result<Self, ValidationError> {
        Ok(Self(ClearTextPassword::for_sign_in(raw)?))
    }

    /// The password text, for the request body that carries it
    pub fn expose(&self) -> &str {
        self.0.expose()
    }
}

impl fmt::Debug for RawPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawPassword([REDACTED])")
    }
}

// ============================================================================
// New Password (signup / recovery / invite)
// ============================================================================

/// Password being chosen, validated against the full policy
pub struct NewPassword(ClearTextPassword);

impl NewPassword {
    /// Validate `raw` and require `confirmation` to match it
    ///
    /// Policy errors are reported before a mismatch, so a too-short password
    /// gets the length message even when the confirmation differs.
    pub fn with_confirmation(raw: String, confirmation: String) -> Result<Self, ValidationError> {
        let password = ClearTextPassword::new(raw)?;
        let confirmation = ClearTextPassword::for_sign_in(confirmation)
            .map_err(|_| ValidationError::PasswordMismatch)?;

        if !password.matches(&confirmation) {
            return Err(ValidationError::PasswordMismatch);
        }

        Ok(Self(password))
    }

    /// The password text, for the request body that carries it
    pub fn expose(&self) -> &str {
        self.0.expose()
    }
}

impl fmt::Debug for NewPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NewPassword([REDACTED])")
    }
}
