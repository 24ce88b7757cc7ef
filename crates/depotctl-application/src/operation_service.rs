//! Operation use cases: launch, cancel and await uploads and downloads.
//!
//! Each launch runs on its own tokio task so the caller stays responsive.
//! Progress and results are reported through the `EventSink`; the returned
//! `OperationHandle` cancels or awaits the run.

use crate::backend::ConsoleBackend;
use crate::events::{EventSink, EventingPrompt};
use crate::profile_service::ProfileService;
use depotctl_core::credentials::{Credentials, SecondFactorPrompt};
use depotctl_core::history::{HISTORY_LIMIT, HistoryRepository};
use depotctl_core::installation::ToolInstallation;
use depotctl_core::operation::{
    FailureReason, OperationCommand, OperationEvent, OperationKind, OperationResult, Outcome,
};
use depotctl_core::profile::Profile;
use depotctl_core::session::SessionState;
use depotctl_core::settings::Settings;
use depotctl_core::{DepotError, Result};
use depotctl_execution::{
    ConsoleLauncher, CredentialFlow, OperationTracker, Session, SessionDriver,
};
use depotctl_infrastructure::{ScriptGenerator, SettingsService};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What to run and as whom.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub profile_name: String,
    pub credentials: Credentials,
}

impl OperationRequest {
    pub fn new(profile_name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            profile_name: profile_name.into(),
            credentials,
        }
    }
}

/// A running operation.
pub struct OperationHandle {
    id: Uuid,
    profile_name: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<OperationResult>>,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    /// A token that cancels this operation when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Aborts the operation and terminates the tool. The result is `Cancelled`.
    pub fn cancel(&self) {
        tracing::info!(operation_id = %self.id, "[OperationService] Cancel requested");
        self.cancel.cancel();
    }

    /// Waits for the operation to finish.
    ///
    /// Outcomes the tool reported (success, failure, timeout) and user
    /// cancellation come back as `Ok`; problems that kept the operation from
    /// running at all (launch, authentication, script I/O) as `Err`.
    pub async fn wait(self) -> Result<OperationResult> {
        self.task
            .await
            .map_err(|e| DepotError::internal(format!("operation task failed: {}", e)))?
    }
}

type InstallationKey = (Option<PathBuf>, Option<PathBuf>);

/// Launches operations against one or more tool installations.
pub struct OperationService {
    profiles: Arc<ProfileService>,
    history: Arc<dyn HistoryRepository>,
    settings: SettingsService,
    backend: Arc<dyn ConsoleBackend>,
    events: EventSink,
    /// Installations resolved so far, keyed by the settings that produced them.
    installations: Mutex<HashMap<InstallationKey, ToolInstallation>>,
    /// Installation roots with a live session.
    active: Arc<Mutex<HashSet<PathBuf>>>,
    recent: Arc<Mutex<VecDeque<OperationResult>>>,
}

impl OperationService {
    pub fn new(
        profiles: Arc<ProfileService>,
        history: Arc<dyn HistoryRepository>,
        settings: SettingsService,
        backend: Arc<dyn ConsoleBackend>,
    ) -> Self {
        Self {
            profiles,
            history,
            settings,
            backend,
            events: EventSink::none(),
            installations: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashSet::new())),
            recent: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn with_events(mut self, sender: mpsc::UnboundedSender<OperationEvent>) -> Self {
        self.events = EventSink::new(sender);
        self
    }

    /// Validates the request and starts the operation in the background.
    ///
    /// Fails without starting anything if the profile is missing or invalid,
    /// its path does not exist, the installation cannot be resolved, or
    /// another session already runs on the same installation.
    pub async fn launch(
        &self,
        request: OperationRequest,
        prompt: Arc<dyn SecondFactorPrompt>,
    ) -> Result<OperationHandle> {
        let profile = self.profiles.get(&request.profile_name).await?;
        profile.validate_for_execution()?;
        request.credentials.validate()?;

        let settings = self.settings.get()?;
        let installation = self.installation(&settings)?;
        let lease = InstallationLease::acquire(self.active.clone(), &installation.root)?;
        let launcher = self.backend.launcher(&settings, &profile)?;

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        tracing::info!(
            operation_id = %id,
            "[OperationService] Launching {} '{}' as {}",
            profile.kind,
            profile.name,
            request.credentials.username()
        );

        let run = Run {
            id,
            prompt: EventingPrompt::new(prompt, id, self.events.clone()),
            profile,
            credentials: request.credentials,
            installation,
            launcher,
            settings,
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        let recorder = Recorder {
            profiles: self.profiles.clone(),
            history: self.history.clone(),
            recent: self.recent.clone(),
            events: self.events.clone(),
        };

        let task = tokio::spawn(async move {
            let _lease = lease;
            let outcome = run.execute().await;
            recorder.finish(run.id, outcome).await
        });

        Ok(OperationHandle {
            id,
            profile_name: request.profile_name,
            cancel,
            task,
        })
    }

    /// Launches and waits in one call.
    pub async fn run(
        &self,
        request: OperationRequest,
        prompt: Arc<dyn SecondFactorPrompt>,
    ) -> Result<OperationResult> {
        self.launch(request, prompt).await?.wait().await
    }

    /// Persisted history, most recent first.
    pub async fn history(&self, limit: usize) -> Result<Vec<OperationResult>> {
        self.history.recent(limit).await
    }

    /// Results finished by this service instance, most recent first.
    pub fn recent_results(&self) -> Vec<OperationResult> {
        lock(&self.recent).iter().rev().cloned().collect()
    }

    /// True while a session is running on the installation at `root`.
    pub fn is_busy(&self, root: &std::path::Path) -> bool {
        lock(&self.active).contains(root)
    }

    fn installation(&self, settings: &Settings) -> Result<ToolInstallation> {
        let key = (settings.tool_root.clone(), settings.build_output.clone());
        if let Some(installation) = lock(&self.installations).get(&key) {
            return Ok(installation.clone());
        }
        let installation = self.backend.installation(settings)?;
        lock(&self.installations).insert(key, installation.clone());
        Ok(installation)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks an installation root as in use until dropped.
struct InstallationLease {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    root: PathBuf,
}

impl InstallationLease {
    fn acquire(active: Arc<Mutex<HashSet<PathBuf>>>, root: &std::path::Path) -> Result<Self> {
        if !lock(&active).insert(root.to_path_buf()) {
            return Err(DepotError::SessionInUse {
                root: root.to_path_buf(),
            });
        }
        Ok(Self {
            active,
            root: root.to_path_buf(),
        })
    }
}

impl Drop for InstallationLease {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.root);
    }
}

/// Where a run stopped when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Login,
    Operation,
}

/// Everything one background run needs.
struct Run {
    id: Uuid,
    profile: Profile,
    credentials: Credentials,
    prompt: EventingPrompt,
    installation: ToolInstallation,
    launcher: Arc<dyn ConsoleLauncher>,
    settings: Settings,
    events: EventSink,
    cancel: CancellationToken,
}

impl Run {
    async fn execute(&self) -> Result<OperationResult> {
        let script = ScriptGenerator::generate(&self.profile, &self.installation, self.id)?;
        self.events.emit(OperationEvent::ScriptGenerated {
            operation_id: self.id,
            path: script.path.clone(),
        });
        let command = ScriptGenerator::command(&self.profile, &script);

        if self.cancel.is_cancelled() {
            return Ok(self.result(Outcome::Cancelled, String::new()));
        }

        let mut session = SessionDriver::new(self.launcher.clone())
            .start(&self.installation)
            .await?;
        let states = self.forward_states(&mut session);

        let outcome = tokio::select! {
            outcome = self.drive(&mut session, &command) => Some(outcome),
            _ = self.cancel.cancelled() => None,
        };
        let outcome = outcome.unwrap_or_else(|| {
            Err((
                Phase::Operation,
                DepotError::Cancelled {
                    tail: session.output_tail(),
                },
            ))
        });

        if session.state() == (SessionState::Completed { success: true }) {
            let _ = session.send_line("quit").await;
        }
        // A failed session is always closed so the next run starts from login
        if let Err(e) = session.close().await {
            tracing::warn!(operation_id = %self.id, "[OperationService] Closing session failed: {}", e);
        }
        drop(session);
        let _ = states.await;

        self.interpret(outcome)
    }

    async fn drive(
        &self,
        session: &mut Session,
        command: &OperationCommand,
    ) -> std::result::Result<OperationResult, (Phase, DepotError)> {
        CredentialFlow::new(&self.prompt, self.settings.login_timeout())
            .with_max_attempts(self.settings.second_factor_retries)
            .login(session, &self.credentials)
            .await
            .map_err(|e| (Phase::Login, e))?;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<String>();
        let events = self.events.clone();
        let operation_id = self.id;
        let forwarder = tokio::spawn(async move {
            while let Some(message) = progress_rx.recv().await {
                events.emit(OperationEvent::Progress {
                    operation_id,
                    message,
                });
            }
        });

        let destination = match self.profile.kind {
            OperationKind::Download => Some(self.profile.path.as_path()),
            OperationKind::Upload => None,
        };
        let result = OperationTracker::new(self.settings.operation_timeout())
            .with_progress(progress_tx)
            .run(session, self.id, &self.profile.name, command, destination)
            .await;
        // Progress lines go out before the result does
        let _ = forwarder.await;
        result.map_err(|e| (Phase::Operation, e))
    }

    fn forward_states(&self, session: &mut Session) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_state_listener(tx);
        let events = self.events.clone();
        let operation_id = self.id;
        tokio::spawn(async move {
            while let Some(state) = rx.recv().await {
                events.emit(OperationEvent::StateChanged {
                    operation_id,
                    state,
                });
            }
        })
    }

    /// Turns tool-reported failures into results; everything else stays an error.
    fn interpret(
        &self,
        outcome: std::result::Result<OperationResult, (Phase, DepotError)>,
    ) -> Result<OperationResult> {
        match outcome {
            Ok(result) => Ok(result),
            Err((_, DepotError::Cancelled { tail })) => Ok(self.result(Outcome::Cancelled, tail)),
            Err((Phase::Operation, DepotError::Timeout { waited_ms, tail })) => Ok(self.result(
                Outcome::TimedOut,
                format!("no result after {} ms\n\n{}", waited_ms, tail),
            )),
            Err((
                Phase::Operation,
                DepotError::OperationFailure {
                    reason,
                    detail,
                    tail,
                    ..
                },
            )) => Ok(self.result(
                Outcome::Failed { reason },
                format!("{}\n\n{}", detail, tail),
            )),
            Err((Phase::Operation, DepotError::ConsoleClosed { tail })) => Ok(self.result(
                Outcome::Failed {
                    reason: FailureReason::Unclassified,
                },
                format!("console closed before the operation finished\n\n{}", tail),
            )),
            Err((_, e)) => Err(e),
        }
    }

    fn result(&self, outcome: Outcome, diagnostic: String) -> OperationResult {
        OperationResult {
            id: self.id,
            kind: self.profile.kind,
            profile_name: self.profile.name.clone(),
            outcome,
            diagnostic,
            build_id: None,
            output_path: None,
            finished_at: chrono::Utc::now(),
        }
    }
}

/// Records finished runs and reports them.
struct Recorder {
    profiles: Arc<ProfileService>,
    history: Arc<dyn HistoryRepository>,
    recent: Arc<Mutex<VecDeque<OperationResult>>>,
    events: EventSink,
}

impl Recorder {
    async fn finish(
        &self,
        operation_id: Uuid,
        outcome: Result<OperationResult>,
    ) -> Result<OperationResult> {
        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(operation_id = %operation_id, "[OperationService] Operation failed: {}", error);
                self.events.emit(OperationEvent::Failed {
                    operation_id,
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        {
            let mut recent = lock(&self.recent);
            recent.push_back(result.clone());
            while recent.len() > HISTORY_LIMIT {
                recent.pop_front();
            }
        }

        if let Err(e) = self.history.append(&result).await {
            self.warn(operation_id, format!("could not save history: {}", e));
        }
        if let Err(e) = self.profiles.record_run(&result).await {
            self.warn(
                operation_id,
                format!("could not update profile '{}': {}", result.profile_name, e),
            );
        }

        tracing::info!(
            operation_id = %operation_id,
            "[OperationService] '{}' finished: {}",
            result.profile_name,
            result.outcome.label()
        );
        self.events.emit(OperationEvent::Finished {
            result: result.clone(),
        });
        Ok(result)
    }

    fn warn(&self, operation_id: Uuid, message: String) {
        tracing::warn!(operation_id = %operation_id, "[OperationService] {}", message);
        self.events.emit(OperationEvent::Warning {
            operation_id: Some(operation_id),
            message,
        });
    }
}
