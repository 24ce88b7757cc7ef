use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use depotctl_application::{
    ConsoleBackend, OperationRequest, OperationService, SimulatedBackend, ToolBackend,
};
use depotctl_core::credentials::Credentials;
use depotctl_core::operation::{OperationEvent, OperationKind, OperationResult, Outcome};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::AppContext;
use crate::prompt::{self, TerminalPrompt};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Profile to run
    pub profile: String,
    /// Account to log in with (defaults to the remembered username)
    #[arg(long, conflicts_with = "anonymous")]
    pub user: Option<String>,
    /// Log in anonymously
    #[arg(long)]
    pub anonymous: bool,
    /// Steam Guard code to send with the login line
    #[arg(long, conflicts_with = "anonymous")]
    pub guard_code: Option<String>,
}

/// Runs the profile and prints the result. Returns whether it succeeded.
pub async fn run(
    ctx: &AppContext,
    kind: OperationKind,
    args: RunArgs,
    simulate: bool,
) -> Result<bool> {
    let profile = ctx.profiles.get(&args.profile).await?;
    if profile.kind != kind {
        bail!(
            "profile '{}' is a {} profile; use `depotctl {}`",
            profile.name,
            profile.kind,
            profile.kind
        );
    }

    let settings = ctx.settings.get()?;
    let identity = resolve_identity(
        kind,
        args.anonymous,
        args.user.as_deref(),
        settings.username.as_deref(),
    )?;
    let credentials = match identity {
        None => Credentials::Anonymous,
        Some(username) => {
            let Some(password) = prompt::read_password(&username).await else {
                bail!("no password entered");
            };
            let credentials = Credentials::account(username.clone(), password);
            let credentials = match args.guard_code {
                Some(code) => credentials.with_guard_code(code),
                None => credentials,
            };
            if settings.username.as_deref() != Some(username.as_str()) {
                ctx.settings.update(|s| {
                    s.username = Some(username.clone());
                    Ok(())
                })?;
            }
            credentials
        }
    };

    let backend: Arc<dyn ConsoleBackend> = if simulate {
        Arc::new(SimulatedBackend::new(ctx.paths.base_dir().join("simulated")))
    } else {
        Arc::new(ToolBackend)
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let service = OperationService::new(
        ctx.profiles.clone(),
        ctx.history.clone(),
        ctx.settings.clone(),
        backend,
    )
    .with_events(tx);
    let printer = tokio::spawn(print_events(rx));

    let handle = service
        .launch(
            OperationRequest::new(&profile.name, credentials),
            Arc::new(TerminalPrompt),
        )
        .await?;
    println!(
        "{} {} '{}' ({})",
        "▶".cyan(),
        kind,
        profile.name,
        handle.id()
    );

    let cancel = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling...".yellow());
            cancel.cancel();
        }
    });

    let outcome = handle.wait().await;
    interrupt.abort();
    // The service holds the only sender; dropping it ends the printer
    drop(service);
    let _ = printer.await;

    let result = outcome?;
    print_result(&result);
    Ok(result.outcome.is_success())
}

/// Picks the account for a run; `None` means anonymous.
///
/// An explicit `--user` wins over the remembered name. Downloads fall back
/// to anonymous, uploads need an account.
pub fn resolve_identity(
    kind: OperationKind,
    anonymous: bool,
    user: Option<&str>,
    remembered: Option<&str>,
) -> Result<Option<String>> {
    if anonymous {
        return Ok(None);
    }
    match user.or(remembered).map(str::trim).filter(|u| !u.is_empty()) {
        Some(username) => Ok(Some(username.to_string())),
        None => match kind {
            OperationKind::Download => Ok(None),
            OperationKind::Upload => {
                bail!("uploads need an account: pass --user or run `depotctl settings set username <name>`")
            }
        },
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<OperationEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            OperationEvent::StateChanged { state, .. } => {
                println!("{}", format!("  [{}]", state).dimmed());
            }
            OperationEvent::ScriptGenerated { path, .. } => {
                println!("{}", format!("  script: {}", path.display()).dimmed());
            }
            OperationEvent::Progress { message, .. } => println!("  {}", message),
            OperationEvent::Warning { message, .. } => {
                println!("{}", format!("  warning: {}", message).yellow());
            }
            // Prompts and the final summary are printed elsewhere
            OperationEvent::SecondFactorRequested { .. }
            | OperationEvent::MobileConfirmationPending { .. }
            | OperationEvent::Finished { .. }
            | OperationEvent::Failed { .. } => {}
        }
    }
}

fn print_result(result: &OperationResult) {
    match &result.outcome {
        Outcome::Succeeded => {
            let build = result
                .build_id
                .map(|id| format!(" (BuildID {})", id))
                .unwrap_or_default();
            println!("{} {} succeeded{}", "✓".green(), result.kind, build);
            if let Some(path) = &result.output_path {
                println!("  files in {}", path.display());
            }
        }
        Outcome::Failed { reason } => {
            println!("{} {} failed: {}", "✗".red(), result.kind, reason);
        }
        Outcome::TimedOut => println!("{} {} timed out", "✗".red(), result.kind),
        Outcome::Cancelled => println!("{} {} cancelled", "!".yellow(), result.kind),
    }
    if !result.outcome.is_success() && !result.diagnostic.is_empty() {
        println!("{}", result.diagnostic.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_user_wins() {
        let identity =
            resolve_identity(OperationKind::Upload, false, Some("ci"), Some("me")).unwrap();
        assert_eq!(identity.as_deref(), Some("ci"));

        let identity = resolve_identity(OperationKind::Upload, false, None, Some("me")).unwrap();
        assert_eq!(identity.as_deref(), Some("me"));
    }

    #[test]
    fn test_anonymous_rules() {
        assert_eq!(
            resolve_identity(OperationKind::Upload, true, None, Some("me")).unwrap(),
            None
        );
        assert_eq!(
            resolve_identity(OperationKind::Download, false, None, None).unwrap(),
            None
        );
        assert!(resolve_identity(OperationKind::Upload, false, None, None).is_err());
        assert!(resolve_identity(OperationKind::Upload, false, Some("  "), None).is_err());
    }
}
