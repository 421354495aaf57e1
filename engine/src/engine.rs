//! The engine proper: per-actor sessions, the job registry, quota
//! gating, control-plane mutations, and the outbound notification
//! channel. Front ends hold an `Arc<Engine>` and a receiver; everything
//! else is internal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::QuackClient;
use crate::config::{Config, DEFAULT_DAILY_CEILING};
use crate::control::{ConfigKey, ControlAction, ControlError};
use crate::orchestrator::{run_job, JobSpec, JobSummary};
use crate::quota::QuotaLedger;
use crate::session::{count_prompt, step, JobInput, Stage, Step};
use crate::store::{Store, StoreError};

const DEFAULT_WELCOME: &str = "Welcome to the Quack AI provisioning assistant.";

/// One out-of-band message for a specific actor. Front ends own
/// delivery; a failure there must never reach back into the engine.
#[derive(Debug, Clone)]
pub struct Notification {
    pub actor_id: String,
    pub body: String,
}

#[derive(Debug, Clone)]
struct JobHandle {
    job_id: String,
    cancelled: Arc<AtomicBool>,
}

pub struct Engine {
    config: Config,
    store: Store,
    ledger: QuotaLedger,
    client: QuackClient,
    sessions: DashMap<String, Stage>,
    jobs: Arc<DashMap<String, JobHandle>>,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

impl Engine {
    pub fn new(config: Config, store: Store, notify_tx: mpsc::UnboundedSender<Notification>) -> Self {
        let client = QuackClient::new(&config.api_base_url, &config.proxies);
        let ledger = QuotaLedger::new(store.clone());
        Self {
            config,
            store,
            ledger,
            client,
            sessions: DashMap::new(),
            jobs: Arc::new(DashMap::new()),
            notify_tx,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    // ---- runtime-editable scalars ----

    pub async fn daily_ceiling(&self) -> Result<u32, StoreError> {
        match self.store.scalar(ConfigKey::DailyCeiling.as_scalar_key()).await? {
            Some(raw) => match raw.parse::<u32>() {
                Ok(ceiling) => Ok(ceiling),
                Err(e) => {
                    warn!(raw = %raw, error = %e, "stored ceiling unparseable; using default");
                    Ok(DEFAULT_DAILY_CEILING)
                }
            },
            None => Ok(DEFAULT_DAILY_CEILING),
        }
    }

    async fn welcome_text(&self) -> Result<String, StoreError> {
        Ok(self
            .store
            .scalar(ConfigKey::WelcomeText.as_scalar_key())
            .await?
            .unwrap_or_else(|| DEFAULT_WELCOME.to_string()))
    }

    async fn caption(&self) -> Result<String, StoreError> {
        Ok(self
            .store
            .scalar(ConfigKey::Caption.as_scalar_key())
            .await?
            .unwrap_or_default())
    }

    async fn message_suffix(&self) -> Result<String, StoreError> {
        Ok(self
            .store
            .scalar(ConfigKey::MessageSuffix.as_scalar_key())
            .await?
            .unwrap_or_default())
    }

    // ---- conversational front end ----

    /// Begin (or restart) the input flow for an actor. Any prior
    /// transient session state is discarded.
    pub async fn start_session(&self, actor_id: &str) -> Result<Vec<String>, StoreError> {
        self.store.record_actor(actor_id).await?;

        if self.store.is_blocked(actor_id).await? {
            return Ok(vec!["You are blocked from using this service.".to_string()]);
        }
        if self.jobs.contains_key(actor_id) {
            return Ok(vec![
                "A provisioning job is already running for you; wait for it to finish."
                    .to_string(),
            ]);
        }

        self.sessions
            .insert(actor_id.to_string(), Stage::AwaitingCount);

        let mut welcome = self.welcome_text().await?;
        let caption = self.caption().await?;
        if !caption.is_empty() {
            welcome.push('\n');
            welcome.push_str(&caption);
        }
        let ceiling = self.daily_ceiling().await?;
        Ok(vec![welcome, count_prompt(ceiling)])
    }

    /// Feed one inbound message into the actor's session. Messages with
    /// no session in progress are ignored.
    pub async fn handle_session_input(
        &self,
        actor_id: &str,
        text: &str,
    ) -> Result<Vec<String>, StoreError> {
        if self.store.is_blocked(actor_id).await? {
            return Ok(Vec::new());
        }
        let Some(stage) = self.sessions.get(actor_id).map(|s| s.value().clone()) else {
            return Ok(Vec::new());
        };

        let ceiling = self.daily_ceiling().await?;
        match step(stage, text, ceiling) {
            Step::Continue { stage, reply } => {
                self.sessions.insert(actor_id.to_string(), stage);
                Ok(vec![reply])
            }
            Step::Submit { input } => {
                // Terminal for this session instance; the job reports
                // out-of-band from here on.
                self.sessions.remove(actor_id);
                self.submit_job(actor_id, input).await
            }
        }
    }

    async fn submit_job(&self, actor_id: &str, input: JobInput) -> Result<Vec<String>, StoreError> {
        if self.jobs.contains_key(actor_id) {
            return Ok(vec![
                "A provisioning job is already running for you; wait for it to finish."
                    .to_string(),
            ]);
        }

        let ceiling = self.daily_ceiling().await?;
        let used = self.ledger.used_today(actor_id).await?;
        if used + input.count > ceiling {
            return Ok(vec![format!(
                "Daily quota exceeded: {used} of {ceiling} already used today."
            )]);
        }

        self.ledger.note_request(input.count).await?;

        let spec = JobSpec {
            job_id: ulid::Ulid::new().to_string(),
            actor_id: actor_id.to_string(),
            requested: input.count,
            referral_code: input.referral_code,
            topics: input.topics,
            enforce_quota: true,
            ceiling,
        };
        let handle = JobHandle {
            job_id: spec.job_id.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        self.jobs.insert(actor_id.to_string(), handle.clone());
        info!(job_id = %spec.job_id, actor = %actor_id, count = spec.requested, "job accepted");

        let client = self.client.clone();
        let store = self.store.clone();
        let ledger = self.ledger.clone();
        let pacing = self.config.pacing;
        let jobs = Arc::clone(&self.jobs);
        let notify_tx = self.notify_tx.clone();
        let suffix = self.message_suffix().await?;
        let actor = actor_id.to_string();
        let requested = spec.requested;

        let progress_suffix = suffix.clone();
        tokio::spawn(async move {
            let progress_actor = actor.clone();
            let progress_tx = notify_tx.clone();
            run_job(
                &client,
                &store,
                &ledger,
                &pacing,
                &spec,
                &handle.cancelled,
                move |line| {
                    let _ = progress_tx.send(Notification {
                        actor_id: progress_actor.clone(),
                        body: format!("{line}{progress_suffix}"),
                    });
                },
            )
            .await;
            jobs.remove(&actor);
        });

        Ok(vec![format!(
            "Provisioning {requested} identities; progress will follow.{suffix}"
        )])
    }

    // ---- control plane ----

    pub async fn handle_control_action(
        &self,
        caller_id: &str,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<String>, ControlError> {
        if caller_id != self.config.admin_actor_id {
            return Err(ControlError::NotPrivileged);
        }

        match ControlAction::parse(action, payload)? {
            ControlAction::Block { target } => {
                self.store.block_actor(&target).await?;
                self.sessions.remove(&target);
                Ok(vec![format!("Blocked {target}.")])
            }
            ControlAction::Unblock { target } => {
                self.store.unblock_actor(&target).await?;
                Ok(vec![format!("Unblocked {target}.")])
            }
            ControlAction::Cancel { target } => match self.jobs.get(&target) {
                Some(handle) => {
                    handle.cancelled.store(true, Ordering::SeqCst);
                    info!(job_id = %handle.job_id, target = %target, "cancellation requested");
                    Ok(vec![format!(
                        "Cancellation requested; {target}'s job stops at its next checkpoint."
                    )])
                }
                None => Ok(vec![format!("No job in flight for {target}.")]),
            },
            ControlAction::SetConfig { key, value } => {
                if key == ConfigKey::DailyCeiling {
                    let parsed: u32 = value
                        .parse()
                        .map_err(|_| ControlError::InvalidValue("daily_ceiling", value.clone()))?;
                    if parsed == 0 {
                        return Err(ControlError::InvalidValue("daily_ceiling", value));
                    }
                }
                self.store.set_scalar(key.as_scalar_key(), &value).await?;
                Ok(vec![format!("Updated {} to '{value}'.", key.as_scalar_key())])
            }
            ControlAction::Broadcast { message } => {
                let suffix = self.message_suffix().await.unwrap_or_default();
                let actors = self.store.known_actors().await?;
                let count = actors.len();
                for actor_id in actors {
                    // Best effort; a dead receiver must not stop the rest.
                    let _ = self.notify_tx.send(Notification {
                        actor_id,
                        body: format!("{message}{suffix}"),
                    });
                }
                Ok(vec![format!("Broadcast queued for {count} actors.")])
            }
            ControlAction::Stats => {
                let requested = self.ledger.lifetime_requested().await?;
                let actors = self.store.unique_actor_count().await?;
                let usage = self
                    .store
                    .quota_usage_on(&QuotaLedger::today())
                    .await?;
                let usage_line = if usage.is_empty() {
                    "none".to_string()
                } else {
                    usage
                        .iter()
                        .map(|(actor, used)| format!("{actor}={used}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                Ok(vec![
                    format!("Lifetime identities requested: {requested}"),
                    format!("Unique actors seen: {actors}"),
                    format!("Active jobs: {}", self.jobs.len()),
                    format!("Today's usage: {usage_line}"),
                ])
            }
        }
    }

    // ---- batch front end ----

    /// Quota-free provisioning run for the command-line front end.
    /// Blocks until the whole batch finishes; progress still flows
    /// through the notification channel.
    pub async fn run_batch(
        &self,
        count: u32,
        referral_code: &str,
        topics: Vec<String>,
    ) -> Result<JobSummary, StoreError> {
        let actor_id = self.config.batch_actor_id.clone();
        self.store.record_actor(&actor_id).await?;
        self.ledger.note_request(count).await?;

        let spec = JobSpec {
            job_id: ulid::Ulid::new().to_string(),
            actor_id: actor_id.clone(),
            requested: count,
            referral_code: referral_code.to_string(),
            topics,
            enforce_quota: false,
            ceiling: u32::MAX,
        };
        let handle = JobHandle {
            job_id: spec.job_id.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        self.jobs.insert(actor_id.clone(), handle.clone());

        let notify_tx = self.notify_tx.clone();
        let progress_actor = actor_id.clone();
        let summary = run_job(
            &self.client,
            &self.store,
            &self.ledger,
            &self.config.pacing,
            &spec,
            &handle.cancelled,
            move |line| {
                let _ = notify_tx.send(Notification {
                    actor_id: progress_actor.clone(),
                    body: line,
                });
            },
        )
        .await;

        self.jobs.remove(&actor_id);
        Ok(summary)
    }

    /// True while a job is in flight for the actor. Exposed for front
    /// ends that want to poll instead of watching notifications.
    pub fn job_in_flight(&self, actor_id: &str) -> bool {
        self.jobs.contains_key(actor_id)
    }
}
