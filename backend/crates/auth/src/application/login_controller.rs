//! Login Controller
//!
//! Behaviour of the single login page across its flows. Input is
//! validated before any network call, and only one submission may be in
//! flight at a time.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::application::config::AuthConfig;
use crate::application::password_reset::PasswordResetUseCase;
use crate::application::session_store::SessionStore;
use crate::application::sign_in::SignInUseCase;
use crate::application::sign_up::SignUpUseCase;
use crate::domain::entity::{Credentials, NewAccount};
use crate::domain::gateway::{AuthGateway, SignUpOutcome};
use crate::domain::value_object::{
    email::Email,
    login_flow::{FlowToken, LoginFlow, TokenKind},
    password::NewPassword,
    return_path::ReturnPath,
};
use crate::error::{AuthError, AuthResult, ValidationError};

// ============================================================================
// Input / Output
// ============================================================================

/// Raw fields of a login form submission
#[derive(Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

impl fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginForm")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// What a successful submission achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    SignedIn,
    /// Sign-up needs the emailed confirmation link
    ConfirmationSent,
    ResetEmailSent,
    /// Invite or recovery finished; the user is signed in
    PasswordSet,
}

/// Outcome plus where to go next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResult {
    pub outcome: FlowOutcome,
    /// Post-login target (sanitized `redirectTo`, default `/dashboard`)
    pub redirect: ReturnPath,
}

impl FlowResult {
    /// Whether the page should navigate away (a session now exists)
    pub fn navigates(&self) -> bool {
        matches!(
            self.outcome,
            FlowOutcome::SignedIn | FlowOutcome::PasswordSet
        )
    }

    /// Confirmation shown on the page when it does not navigate
    pub fn notice(&self) -> Option<&'static str> {
        match self.outcome {
            FlowOutcome::ConfirmationSent => {
                Some("Check your email for a confirmation link to finish signing up.")
            }
            FlowOutcome::ResetEmailSent => {
                Some("If an account exists for that address, a password reset link is on its way.")
            }
            FlowOutcome::SignedIn | FlowOutcome::PasswordSet => None,
        }
    }
}

/// Validated form, ready for the gateway
#[derive(Debug)]
enum Submission {
    SignIn(Credentials),
    SignUp(NewAccount),
    ConfirmSignup(FlowToken),
    RequestReset(Email),
    SetPassword(TokenKind, FlowToken, NewPassword),
    /// The link's session is already held; only the password is missing
    ChoosePassword(TokenKind, NewPassword),
}

impl Submission {
    fn validate(flow: &LoginFlow, form: LoginForm) -> Result<Self, ValidationError> {
        let LoginForm {
            email,
            password,
            password_confirmation,
        } = form;

        Ok(match flow {
            LoginFlow::Login => Submission::SignIn(Credentials::parse(&email, password)?),
            LoginFlow::Signup { confirmation: None } => Submission::SignUp(NewAccount::parse(
                &email,
                password,
                password_confirmation,
            )?),
            LoginFlow::Signup {
                confirmation: Some(token),
            } => Submission::ConfirmSignup(token.clone()),
            LoginFlow::Recovery { token: None } => Submission::RequestReset(Email::new(email)?),
            LoginFlow::Recovery { token: Some(token) } => Submission::SetPassword(
                TokenKind::Recovery,
                token.clone(),
                NewPassword::with_confirmation(password, password_confirmation)?,
            ),
            LoginFlow::Invite { token } => Submission::SetPassword(
                TokenKind::Invite,
                token.clone(),
                NewPassword::with_confirmation(password, password_confirmation)?,
            ),
            LoginFlow::SetPassword { kind } => Submission::ChoosePassword(
                *kind,
                NewPassword::with_confirmation(password, password_confirmation)?,
            ),
        })
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Clears the busy flag when the submission ends, however it ends
pub(crate) struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Login controller
pub struct LoginController<G>
where
    G: AuthGateway,
{
    sign_in: SignInUseCase<G>,
    sign_up: SignUpUseCase<G>,
    reset: PasswordResetUseCase<G>,
    config: Arc<AuthConfig>,
    busy: AtomicBool,
}

impl<G> LoginController<G>
where
    G: AuthGateway,
{
    pub fn new(gateway: Arc<G>, store: Arc<SessionStore>, config: Arc<AuthConfig>) -> Self {
        Self {
            sign_in: SignInUseCase::new(gateway.clone(), store.clone()),
            sign_up: SignUpUseCase::new(gateway.clone(), store.clone()),
            reset: PasswordResetUseCase::new(gateway, store),
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a submission is in flight (the submit button is disabled)
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the in-flight slot
    pub(crate) fn begin(&self) -> AuthResult<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| AuthError::Busy)
    }

    /// Validate and submit `form` for `flow`
    pub async fn submit(
        &self,
        flow: &LoginFlow,
        form: LoginForm,
        redirect: ReturnPath,
    ) -> AuthResult<FlowResult> {
        let _busy = self.begin()?;

        let submission = Submission::validate(flow, form).inspect_err(|e| {
            tracing::debug!(flow = flow.name(), error = %e, "Login form rejected");
        })?;

        let outcome = self.run(submission).await?;

        Ok(FlowResult { outcome, redirect })
    }

    async fn run(&self, submission: Submission) -> AuthResult<FlowOutcome> {
        match submission {
            Submission::SignIn(credentials) => {
                self.sign_in.execute(&credentials).await?;
                Ok(FlowOutcome::SignedIn)
            }
            Submission::SignUp(account) => match self.sign_up.execute(&account).await? {
                SignUpOutcome::SignedIn(_) => Ok(FlowOutcome::SignedIn),
                SignUpOutcome::ConfirmationSent => Ok(FlowOutcome::ConfirmationSent),
            },
            Submission::ConfirmSignup(token) => {
                self.reset.verify(TokenKind::Signup, &token).await?;
                Ok(FlowOutcome::SignedIn)
            }
            Submission::RequestReset(email) => {
                self.reset
                    .request(&email, &self.config.password_reset_redirect())
                    .await?;
                Ok(FlowOutcome::ResetEmailSent)
            }
            Submission::SetPassword(kind, token, password) => {
                self.reset.set_password(kind, &token, &password).await?;
                Ok(FlowOutcome::PasswordSet)
            }
            Submission::ChoosePassword(kind, password) => {
                self.reset.choose_password(kind, &password).await?;
                Ok(FlowOutcome::PasswordSet)
            }
        }
    }
}
