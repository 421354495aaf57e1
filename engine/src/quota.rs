//! Quota Ledger - per-actor daily creation counts against a configurable
//! ceiling, plus the monotonic lifetime counters used for reporting.
//!
//! A record is only valid for the calendar day it was written on; a read
//! on any other day treats the count as zero. Grants commit atomically
//! per actor; denials never touch the record.

use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// Granted; `used_today` is the committed total after this grant.
    Granted { used_today: u32 },
    /// Denied; `used_today` is the unchanged same-day total, for
    /// user-facing messaging.
    Denied { used_today: u32 },
}

#[derive(Debug, Clone)]
pub struct QuotaLedger {
    store: Store,
}

impl QuotaLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Current UTC calendar day, the granularity quota records live at.
    pub fn today() -> String {
        chrono::Utc::now().format("%Y-%m-%d").to_string()
    }

    pub async fn try_consume(
        &self,
        actor_id: &str,
        amount: u32,
        ceiling: u32,
    ) -> Result<QuotaOutcome, StoreError> {
        self.try_consume_on(actor_id, amount, ceiling, &Self::today())
            .await
    }

    /// Same as [`try_consume`], pinned to an explicit day. The engine
    /// always passes today; tests drive the day boundary directly.
    pub async fn try_consume_on(
        &self,
        actor_id: &str,
        amount: u32,
        ceiling: u32,
        day: &str,
    ) -> Result<QuotaOutcome, StoreError> {
        let mut tx = self.store.pool().begin().await?;

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT day, used FROM quota_records WHERE actor_id = ?")
                .bind(actor_id)
                .fetch_optional(&mut *tx)
                .await?;

        // A record from another day counts as zero before comparison.
        let used = match &row {
            Some((stored_day, stored_used)) if stored_day == day => *stored_used as u32,
            _ => 0,
        };

        if used + amount > ceiling {
            return Ok(QuotaOutcome::Denied { used_today: used });
        }

        let new_used = used + amount;
        sqlx::query(
            "INSERT INTO quota_records (actor_id, day, used) VALUES (?, ?, ?)
             ON CONFLICT(actor_id) DO UPDATE SET day = excluded.day, used = excluded.used",
        )
        .bind(actor_id)
        .bind(day)
        .bind(new_used as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(QuotaOutcome::Granted {
            used_today: new_used,
        })
    }

    pub async fn used_today(&self, actor_id: &str) -> Result<u32, StoreError> {
        self.used_on(actor_id, &Self::today()).await
    }

    /// Bump the lifetime identities-requested counter. Monotonic, never
    /// reset; reporting only.
    pub async fn note_request(&self, amount: u32) -> Result<(), StoreError> {
        self.store
            .incr_stat("identities_requested", amount as i64)
            .await
    }

    pub async fn lifetime_requested(&self) -> Result<i64, StoreError> {
        self.store.stat("identities_requested").await
    }

    pub async fn used_on(&self, actor_id: &str, day: &str) -> Result<u32, StoreError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT day, used FROM quota_records WHERE actor_id = ?")
                .bind(actor_id)
                .fetch_optional(self.store.pool())
                .await?;
        Ok(match &row {
            Some((stored_day, used)) if stored_day == day => *used as u32,
            _ => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_ledger() -> (tempfile::TempDir, QuotaLedger) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flock.db");
        let store = Store::connect(path.to_str().unwrap()).await.unwrap();
        (dir, QuotaLedger::new(store))
    }

    #[tokio::test]
    async fn grants_up_to_ceiling_and_denies_past_it() {
        let (_dir, ledger) = temp_ledger().await;

        assert_eq!(
            ledger
                .try_consume_on("alice", 4, 10, "2026-08-05")
                .await
                .unwrap(),
            QuotaOutcome::Granted { used_today: 4 }
        );
        // Boundary: 4 + 6 == 10 still fits.
        assert_eq!(
            ledger
                .try_consume_on("alice", 6, 10, "2026-08-05")
                .await
                .unwrap(),
            QuotaOutcome::Granted { used_today: 10 }
        );
        assert_eq!(
            ledger
                .try_consume_on("alice", 1, 10, "2026-08-05")
                .await
                .unwrap(),
            QuotaOutcome::Denied { used_today: 10 }
        );
    }

    #[tokio::test]
    async fn denial_never_mutates_the_record() {
        let (_dir, ledger) = temp_ledger().await;

        ledger
            .try_consume_on("alice", 8, 10, "2026-08-05")
            .await
            .unwrap();
        ledger
            .try_consume_on("alice", 5, 10, "2026-08-05")
            .await
            .unwrap();
        assert_eq!(ledger.used_on("alice", "2026-08-05").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn day_boundary_resets_before_first_grant() {
        let (_dir, ledger) = temp_ledger().await;

        ledger
            .try_consume_on("alice", 10, 10, "2026-08-05")
            .await
            .unwrap();
        assert_eq!(ledger.used_on("alice", "2026-08-05").await.unwrap(), 10);

        // Next day: exhausted record reads as zero and the grant succeeds.
        assert_eq!(
            ledger
                .try_consume_on("alice", 3, 10, "2026-08-06")
                .await
                .unwrap(),
            QuotaOutcome::Granted { used_today: 3 }
        );
        assert_eq!(ledger.used_on("alice", "2026-08-06").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn actors_are_accounted_independently() {
        let (_dir, ledger) = temp_ledger().await;

        ledger
            .try_consume_on("alice", 9, 10, "2026-08-05")
            .await
            .unwrap();
        assert_eq!(
            ledger
                .try_consume_on("bob", 10, 10, "2026-08-05")
                .await
                .unwrap(),
            QuotaOutcome::Granted { used_today: 10 }
        );
    }
}
