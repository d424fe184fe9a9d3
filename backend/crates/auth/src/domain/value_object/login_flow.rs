//! Login Flow Value Objects
//!
//! The login page serves four flows. Which one is decided by the `type`,
//! `token` and `email` parameters of the URL that opened it; hosted auth
//! providers put those in the fragment, links we build put them in the query.
//!
//! Implicit-flow links carry a session (`access_token`, `refresh_token`)
//! instead of a one-time token. The auth callback adopts that session and
//! sends the user on with `session=link`.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Url, form_urlencoded};

use crate::domain::value_object::email::Email;
use crate::domain::value_object::return_path::ReturnPath;

// ============================================================================
// Token Kind
// ============================================================================

/// One-time token types understood by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[display("invite")]
    Invite,
    #[display("recovery")]
    Recovery,
    #[display("signup")]
    Signup,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Invite => "invite",
            TokenKind::Recovery => "recovery",
            TokenKind::Signup => "signup",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "invite" => Some(TokenKind::Invite),
            "recovery" => Some(TokenKind::Recovery),
            "signup" => Some(TokenKind::Signup),
            _ => None,
        }
    }
}

// ============================================================================
// Flow Token
// ============================================================================

/// Opaque one-time token from an emailed link
#[derive(Clone, PartialEq, Eq)]
pub struct FlowToken {
    token: String,
    email: Option<Email>,
}

impl FlowToken {
    /// `None` for an empty token. An unparsable email is dropped, not fatal:
    /// the token alone may still verify.
    pub fn new(token: impl Into<String>, email: Option<&str>) -> Option<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return None;
        }
        Some(Self {
            token,
            email: email.and_then(|e| Email::new(e).ok()),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn email(&self) -> Option<&Email> {
        self.email.as_ref()
    }
}

impl fmt::Debug for FlowToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowToken")
            .field("token", &"[REDACTED]")
            .field("email", &self.email)
            .finish()
    }
}

// ============================================================================
// Flow Params
// ============================================================================

/// Raw parameters of the login URL
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FlowParams {
    pub flow_type: Option<String>,
    pub token: Option<String>,
    pub email: Option<String>,
    pub redirect_to: Option<String>,
    /// Set by the hosted provider when an emailed link was rejected
    pub error_description: Option<String>,
    /// Session carried by an implicit-flow link; never forwarded
    pub refresh_token: Option<String>,
    /// The link's session was already adopted by the auth callback
    pub link_session: bool,
}

impl FlowParams {
    /// Read query string and fragment; the query wins on conflicts
    pub fn from_url(url: &Url) -> Self {
        let from_query = Self::from_query(url.query().unwrap_or(""));
        let from_fragment = Self::from_query(url.fragment().unwrap_or(""));
        from_query.or(from_fragment)
    }

    /// Parse an `application/x-www-form-urlencoded` string
    pub fn from_query(raw: &str) -> Self {
        Self::from_pairs(form_urlencoded::parse(raw.trim_start_matches(['?', '#']).as_bytes()))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "type" => &mut params.flow_type,
                "token" => &mut params.token,
                // Newer email templates send the hashed token instead
                "token_hash" => {
                    if params.token.is_some() {
                        continue;
                    }
                    &mut params.token
                }
                "email" => &mut params.email,
                "redirectTo" | "redirect_to" => &mut params.redirect_to,
                "error_description" => &mut params.error_description,
                "refresh_token" => &mut params.refresh_token,
                "session" => {
                    params.link_session |= value == "link";
                    continue;
                }
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        params
    }

    /// Fill every unset field from `other`
    pub fn or(self, other: Self) -> Self {
        Self {
            flow_type: self.flow_type.or(other.flow_type),
            token: self.token.or(other.token),
            email: self.email.or(other.email),
            redirect_to: self.redirect_to.or(other.redirect_to),
            error_description: self.error_description.or(other.error_description),
            refresh_token: self.refresh_token.or(other.refresh_token),
            link_session: self.link_session || other.link_session,
        }
    }

    pub fn return_path(&self) -> ReturnPath {
        ReturnPath::or_default(self.redirect_to.as_deref())
    }

    /// Back to a query string, for forwarding from the auth callback
    pub fn to_query(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        let fields = [
            ("type", &self.flow_type),
            ("token", &self.token),
            ("email", &self.email),
            ("redirectTo", &self.redirect_to),
            ("error_description", &self.error_description),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }
        if self.link_session {
            query.append_pair("session", "link");
        }
        query.finish()
    }
}

impl fmt::Debug for FlowParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowParams")
            .field("flow_type", &self.flow_type)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("email", &self.email)
            .field("redirect_to", &self.redirect_to)
            .field("error_description", &self.error_description)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("link_session", &self.link_session)
            .finish()
    }
}

// ============================================================================
// Login Flow
// ============================================================================

/// Which form the login page shows and what submitting it does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFlow {
    /// Email + password sign-in
    Login,
    /// New account; with a token, confirmation of the emailed link
    Signup { confirmation: Option<FlowToken> },
    /// Without a token, ask for a reset email; with one, choose a new password
    Recovery { token: Option<FlowToken> },
    /// Choose a password for an invited account
    Invite { token: FlowToken },
    /// Choose a password inside the session a recovery or invite link opened
    SetPassword { kind: TokenKind },
}

/// Inputs a flow's form asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowFields {
    pub email: bool,
    pub password: bool,
    pub confirmation: bool,
}

impl LoginFlow {
    /// Unknown `type` values and invites without a token fall back to `Login`
    pub fn from_params(params: &FlowParams) -> Self {
        let token = params
            .token
            .as_deref()
            .and_then(|t| FlowToken::new(t, params.email.as_deref()));
        let kind = params.flow_type.as_deref().and_then(TokenKind::parse);

        if let Some(kind @ (TokenKind::Recovery | TokenKind::Invite)) = kind
            && params.link_session
            && token.is_none()
        {
            return LoginFlow::SetPassword { kind };
        }

        match kind {
            Some(TokenKind::Invite) => match token {
                Some(token) => LoginFlow::Invite { token },
                None => LoginFlow::Login,
            },
            Some(TokenKind::Recovery) => LoginFlow::Recovery { token },
            Some(TokenKind::Signup) => LoginFlow::Signup {
                confirmation: token,
            },
            None => LoginFlow::Login,
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self::from_params(&FlowParams::from_url(url))
    }

    /// Short name for logs and the hidden form field
    pub fn name(&self) -> &'static str {
        match self {
            LoginFlow::Login => "login",
            LoginFlow::Signup { .. } => "signup",
            LoginFlow::Recovery { .. } => "recovery",
            LoginFlow::Invite { .. } => "invite",
            LoginFlow::SetPassword { kind } => kind.as_str(),
        }
    }

    /// The one-time token carried by this flow, if any
    pub fn token(&self) -> Option<(TokenKind, &FlowToken)> {
        match self {
            LoginFlow::Login => None,
            LoginFlow::Signup { confirmation } => {
                confirmation.as_ref().map(|t| (TokenKind::Signup, t))
            }
            LoginFlow::Recovery { token } => token.as_ref().map(|t| (TokenKind::Recovery, t)),
            LoginFlow::Invite { token } => Some((TokenKind::Invite, token)),
            LoginFlow::SetPassword { .. } => None,
        }
    }

    pub fn fields(&self) -> FlowFields {
        match self {
            LoginFlow::Login => FlowFields {
                email: true,
                password: true,
                confirmation: false,
            },
            LoginFlow::Signup { confirmation: None } => FlowFields {
                email: true,
                password: true,
                confirmation: true,
            },
            LoginFlow::Signup {
                confirmation: Some(_),
            } => FlowFields {
                email: false,
                password: false,
                confirmation: false,
            },
            LoginFlow::Recovery { token: None } => FlowFields {
                email: true,
                password: false,
                confirmation: false,
            },
            LoginFlow::Recovery { token: Some(_) }
            | LoginFlow::Invite { .. }
            | LoginFlow::SetPassword { .. } => FlowFields {
                email: false,
                password: true,
                confirmation: true,
            },
        }
    }
}
