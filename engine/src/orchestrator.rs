//! Job Orchestrator - sequences identity creation, registration, and
//! conversation per unit, strictly sequentially within one job. The
//! per-unit checkpoint re-evaluates cancellation and quota state; a unit
//! already in flight is never aborted.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use crate::api::QuackClient;
use crate::config::{sleep_jitter, Pacing};
use crate::conversation::{run_conversation, MAX_CHATS_PER_IDENTITY};
use crate::identity::create_identity;
use crate::quota::{QuotaLedger, QuotaOutcome};
use crate::registration::register;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: String,
    pub actor_id: String,
    pub requested: u32,
    pub referral_code: String,
    pub topics: Vec<String>,
    /// Batch runs skip the daily ledger entirely.
    pub enforce_quota: bool,
    /// Ceiling snapshot taken when the job was submitted.
    pub ceiling: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    QuotaExhausted,
    ReferralRejected,
    IdentityFailure,
}

#[derive(Debug, Clone, Copy)]
pub struct JobSummary {
    pub outcome: JobOutcome,
    pub produced: u32,
    pub registered: u32,
    pub full_conversations: u32,
}

impl JobSummary {
    pub fn describe(&self) -> String {
        let outcome = match self.outcome {
            JobOutcome::Completed => "complete",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::QuotaExhausted => "stopped: daily quota exhausted",
            JobOutcome::ReferralRejected => "aborted: referral code rejected",
            JobOutcome::IdentityFailure => "aborted: identity creation failed",
        };
        format!(
            "Job {}. {} produced, {} registered, {} finished all {} chats.",
            outcome, self.produced, self.registered, self.full_conversations, MAX_CHATS_PER_IDENTITY
        )
    }
}

/// Run one job to completion. Progress lines go through `progress` as
/// they happen; the returned summary is also pushed through it so the
/// requesting actor hears the ending out-of-band.
pub async fn run_job(
    client: &QuackClient,
    store: &Store,
    ledger: &QuotaLedger,
    pacing: &Pacing,
    spec: &JobSpec,
    cancelled: &AtomicBool,
    mut progress: impl FnMut(String),
) -> JobSummary {
    let mut summary = JobSummary {
        outcome: JobOutcome::Completed,
        produced: 0,
        registered: 0,
        full_conversations: 0,
    };

    // Precondition for the handshake; already-produced units would be
    // kept, but with a bad code nothing ever starts.
    if spec.referral_code.chars().count() != 6 {
        summary.outcome = JobOutcome::ReferralRejected;
        progress(summary.describe());
        return summary;
    }

    info!(
        job_id = %spec.job_id,
        actor = %spec.actor_id,
        requested = spec.requested,
        "job started"
    );

    for index in 0..spec.requested {
        sleep_jitter(pacing.stagger_ms).await;

        // Checkpoint: cancellation and quota state. Cooperative only; a
        // registration or conversation already in flight runs to its end.
        if cancelled.load(Ordering::SeqCst) {
            summary.outcome = JobOutcome::Cancelled;
            break;
        }
        if spec.enforce_quota {
            match ledger.used_today(&spec.actor_id).await {
                Ok(used) if used >= spec.ceiling => {
                    summary.outcome = JobOutcome::QuotaExhausted;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(job_id = %spec.job_id, error = %e, "quota read failed at checkpoint");
                }
            }
        }

        let mut identity = match create_identity() {
            Ok(identity) => identity,
            Err(e) => {
                error!(job_id = %spec.job_id, error = %e, "identity creation failed");
                summary.outcome = JobOutcome::IdentityFailure;
                break;
            }
        };
        identity.topics = spec.topics.clone();
        identity.proxy_ref = client.proxy_ref_at(index as usize);

        let registered = register(client, &mut identity, &spec.referral_code).await;
        if registered {
            run_conversation(client, &mut identity, pacing).await;
        }

        // Persist before anything else so partial progress survives a
        // crash mid-run.
        if let Err(e) = store.append_identity(&spec.actor_id, &identity).await {
            error!(
                job_id = %spec.job_id,
                address = %identity.address,
                error = %e,
                "identity produced but could not be archived"
            );
        }

        summary.produced += 1;
        if registered {
            summary.registered += 1;
        }
        if identity.chat_count == MAX_CHATS_PER_IDENTITY {
            summary.full_conversations += 1;
        }

        // Quota is charged per produced unit, attempts included.
        if spec.enforce_quota {
            match ledger.try_consume(&spec.actor_id, 1, spec.ceiling).await {
                Ok(QuotaOutcome::Granted { .. }) => {}
                Ok(QuotaOutcome::Denied { used_today }) => {
                    info!(
                        job_id = %spec.job_id,
                        used_today,
                        "quota denied after unit; stopping"
                    );
                    summary.outcome = JobOutcome::QuotaExhausted;
                    progress(format!(
                        "Unit {}/{} produced; daily quota exhausted ({} used).",
                        summary.produced, spec.requested, used_today
                    ));
                    break;
                }
                Err(e) => {
                    error!(job_id = %spec.job_id, error = %e, "quota charge failed");
                }
            }
        }

        progress(format!(
            "Unit {}/{} produced ({}).",
            summary.produced,
            spec.requested,
            if registered { "registered" } else { "unregistered" }
        ));
    }

    info!(
        job_id = %spec.job_id,
        produced = summary.produced,
        registered = summary.registered,
        "job finished"
    );
    progress(summary.describe());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    async fn temp_parts() -> (tempfile::TempDir, Store, QuotaLedger, QuackClient) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flock.db");
        let store = Store::connect(path.to_str().unwrap()).await.unwrap();
        let ledger = QuotaLedger::new(store.clone());
        // Nothing listens on port 1: every remote call fails as a
        // transport error, which the job must absorb per unit.
        let client = QuackClient::new("http://127.0.0.1:1", &[]);
        (dir, store, ledger, client)
    }

    fn spec(requested: u32, ceiling: u32) -> JobSpec {
        JobSpec {
            job_id: ulid::Ulid::nil().to_string(),
            actor_id: "alice".to_string(),
            requested,
            referral_code: "ABCDEF".to_string(),
            topics: vec!["t1".to_string(), "t2".to_string()],
            enforce_quota: true,
            ceiling,
        }
    }

    #[tokio::test]
    async fn produces_requested_units_despite_registration_failures() {
        let (_dir, store, ledger, client) = temp_parts().await;
        let mut lines = Vec::new();

        let summary = run_job(
            &client,
            &store,
            &ledger,
            &Pacing::instant(),
            &spec(3, 10),
            &AtomicBool::new(false),
            |line| lines.push(line),
        )
        .await;

        assert_eq!(summary.outcome, JobOutcome::Completed);
        assert_eq!(summary.produced, 3);
        assert_eq!(summary.registered, 0);
        assert_eq!(summary.full_conversations, 0);

        let records = store.identities_for("alice").await.unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.topics, vec!["t1", "t2"]);
            assert!(!record.registered);
        }
        assert_eq!(ledger.used_today("alice").await.unwrap(), 3);
        // Three per-unit progress lines plus the summary.
        assert_eq!(lines.len(), 4);
    }

    #[tokio::test]
    async fn cancellation_before_first_checkpoint_produces_nothing() {
        let (_dir, store, ledger, client) = temp_parts().await;

        let summary = run_job(
            &client,
            &store,
            &ledger,
            &Pacing::instant(),
            &spec(5, 10),
            &AtomicBool::new(true),
            |_| {},
        )
        .await;

        assert_eq!(summary.outcome, JobOutcome::Cancelled);
        assert_eq!(summary.produced, 0);
        assert!(store.identities_for("alice").await.unwrap().is_empty());
        assert_eq!(ledger.used_today("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn quota_checkpoint_stops_the_loop_at_the_ceiling() {
        let (_dir, store, ledger, client) = temp_parts().await;

        let summary = run_job(
            &client,
            &store,
            &ledger,
            &Pacing::instant(),
            &spec(5, 2),
            &AtomicBool::new(false),
            |_| {},
        )
        .await;

        assert_eq!(summary.outcome, JobOutcome::QuotaExhausted);
        assert_eq!(summary.produced, 2);
        assert_eq!(ledger.used_today("alice").await.unwrap(), 2);
        assert_eq!(store.identities_for("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_referral_code_aborts_before_any_unit() {
        let (_dir, store, ledger, client) = temp_parts().await;

        let mut job = spec(3, 10);
        job.referral_code = "ABCDEFG".to_string();
        let summary = run_job(
            &client,
            &store,
            &ledger,
            &Pacing::instant(),
            &job,
            &AtomicBool::new(false),
            |_| {},
        )
        .await;

        assert_eq!(summary.outcome, JobOutcome::ReferralRejected);
        assert_eq!(summary.produced, 0);
        assert!(store.identities_for("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_jobs_skip_the_ledger() {
        let (_dir, store, ledger, client) = temp_parts().await;

        let mut job = spec(3, 1);
        job.enforce_quota = false;
        job.actor_id = "batch".to_string();
        let summary = run_job(
            &client,
            &store,
            &ledger,
            &Pacing::instant(),
            &job,
            &AtomicBool::new(false),
            |_| {},
        )
        .await;

        assert_eq!(summary.outcome, JobOutcome::Completed);
        assert_eq!(summary.produced, 3);
        assert_eq!(ledger.used_today("batch").await.unwrap(), 0);
        assert_eq!(store.identities_for("batch").await.unwrap().len(), 3);
    }
}
