//! Credentials
//!
//! Transient form input. Built from raw strings, validated on construction,
//! never persisted; the password half is zeroized when dropped.

use crate::domain::value_object::{
    email::Email,
    password::{NewPassword, RawPassword},
};
use crate::error::ValidationError;

/// Email + password for sign-in
#[derive(Debug)]
pub struct Credentials {
    pub email: Email,
    pub password: RawPassword,
}

impl Credentials {
    /// Email is checked first, so a form with both fields wrong reports the email
    pub fn parse(email: &str, password: String) -> Result<Self, ValidationError> {
        let email = Email::new(email)?;
        let password = RawPassword::new(password)?;
        Ok(Self { email, password })
    }
}

/// Email + chosen password for sign-up
#[derive(Debug)]
pub struct NewAccount {
    pub email: Email,
    pub password: NewPassword,
}

impl NewAccount {
    pub fn parse(
        email: &str,
        password: String,
        confirmation: String,
    ) -> Result<Self, ValidationError> {
        let email = Email::new(email)?;
        let password = NewPassword::with_confirmation(password, confirmation)?;
        Ok(Self { email, password })
    }
}
