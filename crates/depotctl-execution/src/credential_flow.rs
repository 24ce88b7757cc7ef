//! Login handshake including second-factor prompts and retries.

use crate::driver::Session;
use depotctl_core::credentials::{CodeKind, CodeRequest, Credentials, SecondFactorPrompt};
use depotctl_core::markers::{ConsoleEvent, Marker};
use depotctl_core::session::SessionState;
use depotctl_core::{AuthFailure, DepotError, Result};
use std::time::Duration;

pub const DEFAULT_SECOND_FACTOR_RETRIES: u32 = 3;

const LOGIN_EVENTS: &[ConsoleEvent] = &[
    ConsoleEvent::LoginSucceeded,
    ConsoleEvent::SecondFactorRequired,
    ConsoleEvent::EmailCodeRequired,
    ConsoleEvent::MobileConfirmation,
    ConsoleEvent::BadCredentials,
    ConsoleEvent::RateLimited,
    ConsoleEvent::InvalidSecondFactor,
];

/// Drives a session from `Launching` to `Authenticated`.
pub struct CredentialFlow<'a> {
    prompt: &'a dyn SecondFactorPrompt,
    max_attempts: u32,
    timeout: Duration,
}

impl<'a> CredentialFlow<'a> {
    pub fn new(prompt: &'a dyn SecondFactorPrompt, timeout: Duration) -> Self {
        Self {
            prompt,
            max_attempts: DEFAULT_SECOND_FACTOR_RETRIES,
            timeout,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Logs in, asking the prompt for codes as the tool requests them.
    ///
    /// On failure the session is left in `Completed { success: false }`;
    /// the caller still owns closing it.
    pub async fn login(&self, session: &mut Session, credentials: &Credentials) -> Result<()> {
        credentials.validate()?;
        let result = self.run(session, credentials).await;
        match &result {
            Ok(()) => tracing::info!(
                session_id = %session.id(),
                "[CredentialFlow] Logged in as {}",
                credentials.username()
            ),
            Err(e) => {
                tracing::warn!(session_id = %session.id(), "[CredentialFlow] Login failed: {}", e);
                session.fail();
            }
        }
        result
    }

    async fn run(&self, session: &mut Session, credentials: &Credentials) -> Result<()> {
        session.set_state(SessionState::AwaitingLogin)?;
        session
            .send_secret_line(&credentials.login_line(), &credentials.redacted_login_line())
            .await?;

        let login_markers = session.markers().select(LOGIN_EVENTS);
        let mut retry_markers: Vec<Marker> = login_markers.clone();
        retry_markers.extend(session.markers().select(&[ConsoleEvent::Prompt]));

        let mut attempts: u32 = 0;
        let mut rejected = false;
        // After a rejected code the tool either re-prompts or drops back to its prompt
        let mut awaiting_retry = false;

        loop {
            let markers = if awaiting_retry {
                &retry_markers
            } else {
                &login_markers
            };
            let found = match session.await_pattern(markers, self.timeout).await {
                Ok(found) => found,
                Err(DepotError::Timeout { waited_ms, tail }) => {
                    return Err(DepotError::auth(AuthFailure::Timeout { waited_ms }, tail));
                }
                Err(e) => return Err(e),
            };

            match found.event {
                ConsoleEvent::LoginSucceeded => {
                    session.set_state(SessionState::Authenticated)?;
                    return Ok(());
                }
                ConsoleEvent::SecondFactorRequired | ConsoleEvent::EmailCodeRequired => {
                    awaiting_retry = false;
                    if attempts >= self.max_attempts {
                        return Err(DepotError::auth(
                            AuthFailure::RetryExhausted { attempts },
                            session.output_tail(),
                        ));
                    }
                    attempts += 1;
                    session.set_state(SessionState::AwaitingSecondFactor)?;

                    let kind = if found.event == ConsoleEvent::EmailCodeRequired {
                        CodeKind::Email
                    } else {
                        CodeKind::Authenticator
                    };
                    let request = CodeRequest {
                        attempt: attempts,
                        max_attempts: self.max_attempts,
                        kind,
                        previous_rejected: rejected,
                    };
                    tracing::info!(
                        "[CredentialFlow] Requesting second-factor code ({}/{})",
                        attempts,
                        self.max_attempts
                    );
                    let code = self
                        .prompt
                        .request_code(request)
                        .await
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .ok_or_else(|| {
                            DepotError::auth(AuthFailure::CodeUnavailable, session.output_tail())
                        })?;
                    session.send_secret_line(&code, "******").await?;
                }
                ConsoleEvent::InvalidSecondFactor => {
                    rejected = true;
                    tracing::warn!(
                        "[CredentialFlow] Second-factor code rejected ({}/{})",
                        attempts,
                        self.max_attempts
                    );
                    if attempts >= self.max_attempts {
                        return Err(DepotError::auth(
                            AuthFailure::RetryExhausted { attempts },
                            session.output_tail(),
                        ));
                    }
                    awaiting_retry = true;
                }
                ConsoleEvent::Prompt if awaiting_retry => {
                    // Back at the prompt: the login itself has to be repeated
                    awaiting_retry = false;
                    session
                        .send_secret_line(
                            &credentials.login_line(),
                            &credentials.redacted_login_line(),
                        )
                        .await?;
                }
                ConsoleEvent::MobileConfirmation => {
                    if session.state() != SessionState::AwaitingSecondFactor {
                        session.set_state(SessionState::AwaitingSecondFactor)?;
                    }
                    tracing::info!("[CredentialFlow] Waiting for mobile app confirmation");
                    self.prompt.mobile_confirmation_pending().await;
                }
                ConsoleEvent::BadCredentials => {
                    return Err(DepotError::auth(
                        AuthFailure::BadCredentials {
                            detail: found.line,
                        },
                        session.output_tail(),
                    ));
                }
                ConsoleEvent::RateLimited => {
                    return Err(DepotError::auth(
                        AuthFailure::RateLimited,
                        session.output_tail(),
                    ));
                }
                _ => {}
            }
        }
    }
}
