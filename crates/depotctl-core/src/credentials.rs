//! Login credentials and the second-factor collaborator interface.

use serde::Serialize;
use std::fmt;

use crate::error::{DepotError, Result};
use crate::operation::quote_console_arg;

/// Credentials for one session. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Account {
        username: String,
        password: String,
        /// Guard code known before login, sent on the login line itself.
        guard_code: Option<String>,
    },
}

impl Credentials {
    pub fn account(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Account {
            username: username.into(),
            password: password.into(),
            guard_code: None,
        }
    }

    pub fn with_guard_code(self, code: impl Into<String>) -> Self {
        match self {
            Self::Account {
                username, password, ..
            } => Self::Account {
                username,
                password,
                guard_code: Some(code.into()),
            },
            Self::Anonymous => Self::Anonymous,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Account { username, .. } => username,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Self::Account {
            username,
            password,
            guard_code,
        } = self
        {
            if username.trim().is_empty() || username.chars().any(char::is_whitespace) {
                return Err(DepotError::validation(
                    "username",
                    "must be a single non-empty word",
                ));
            }
            if password.is_empty() {
                return Err(DepotError::validation("password", "must not be empty"));
            }
            if password.contains('"') || password.contains('\n') || password.contains('\r') {
                return Err(DepotError::validation(
                    "password",
                    "cannot contain double quotes or line breaks",
                ));
            }
            if let Some(code) = guard_code {
                if code.trim().is_empty() || code.chars().any(char::is_whitespace) {
                    return Err(DepotError::validation(
                        "guard_code",
                        "must be a single non-empty word",
                    ));
                }
            }
        }
        Ok(())
    }

    /// The console line that starts the login.
    pub fn login_line(&self) -> String {
        match self {
            Self::Anonymous => "login anonymous".to_string(),
            Self::Account {
                username,
                password,
                guard_code,
            } => {
                let mut line = format!("login {} {}", username, quote_console_arg(password));
                if let Some(code) = guard_code {
                    line.push(' ');
                    line.push_str(code);
                }
                line
            }
        }
    }

    /// Same shape as `login_line`, safe to log.
    pub fn redacted_login_line(&self) -> String {
        match self {
            Self::Anonymous => "login anonymous".to_string(),
            Self::Account {
                username,
                guard_code,
                ..
            } => {
                if guard_code.is_some() {
                    format!("login {} ******** ******", username)
                } else {
                    format!("login {} ********", username)
                }
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Account {
                username,
                guard_code,
                ..
            } => f
                .debug_struct("Account")
                .field("username", username)
                .field("password", &"<redacted>")
                .field("guard_code", &guard_code.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// How the tool asked for a second factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// Code from the mobile authenticator app.
    Authenticator,
    /// Code sent by email.
    Email,
}

/// One request for a second-factor code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodeRequest {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub kind: CodeKind,
    /// True when the previous code was rejected.
    pub previous_rejected: bool,
}

/// UI collaborator that supplies second-factor codes on demand.
#[async_trait::async_trait]
pub trait SecondFactorPrompt: Send + Sync {
    /// Returns `None` when the user declines to enter a code.
    async fn request_code(&self, request: CodeRequest) -> Option<String>;

    /// Called when the tool waits for an approval in the mobile app.
    async fn mobile_confirmation_pending(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_line_with_guard_code() {
        let creds = Credentials::account("builder", "hunter2").with_guard_code("ABCDE");
        assert_eq!(creds.login_line(), "login builder hunter2 ABCDE");
        assert_eq!(
            creds.redacted_login_line(),
            "login builder ******** ******"
        );
    }

    #[test]
    fn test_password_with_space_is_quoted() {
        let creds = Credentials::account("builder", "correct horse");
        assert_eq!(creds.login_line(), "login builder \"correct horse\"");
    }

    #[test]
    fn test_debug_never_prints_password() {
        let creds = Credentials::account("builder", "hunter2");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("builder"));
    }

    #[test]
    fn test_validate_rejects_quote_in_password() {
        let creds = Credentials::account("builder", "a\"b");
        assert!(creds.validate().unwrap_err().is_validation());
        assert!(Credentials::Anonymous.validate().is_ok());
    }
}
