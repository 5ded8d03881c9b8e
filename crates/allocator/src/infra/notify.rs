//! Hands resolution outcomes to the application status and notification
//! pipeline. Delivery is best effort and never affects the allocation.

use {crate::domain::WinnerOutcome, sqlx::PgPool, tracing::Instrument};

/// Called after the outcome has been committed. Implementations must not
/// block the caller.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, outcome: &WinnerOutcome);
}

/// Only writes the outcome to the log.
pub struct Log;

impl Notifier for Log {
    fn notify(&self, outcome: &WinnerOutcome) {
        tracing::info!(?outcome, "listing resolved");
    }
}

/// Publishes the outcome as JSON on a Postgres notification channel so that
/// the application status service can pick it up with `LISTEN`.
pub struct Postgres {
    pool: PgPool,
    channel: String,
}

impl Postgres {
    pub fn new(pool: PgPool, channel: String) -> Self {
        Self { pool, channel }
    }
}

impl Notifier for Postgres {
    fn notify(&self, outcome: &WinnerOutcome) {
        let payload = match serde_json::to_string(outcome) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(?err, ?outcome, "failed to serialize outcome");
                return;
            }
        };
        let pool = self.pool.clone();
        let channel = self.channel.clone();
        let listing = outcome.listing_id;
        tokio::spawn(
            async move {
                let result = sqlx::query("SELECT pg_notify($1, $2)")
                    .bind(&channel)
                    .bind(&payload)
                    .execute(&pool)
                    .await;
                match result {
                    Ok(_) => tracing::debug!(%listing, "published outcome"),
                    Err(err) => tracing::warn!(?err, %listing, "failed to publish outcome"),
                }
            }
            .instrument(tracing::Span::current()),
        );
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            ApplicantId,
            EntryId,
            Kind,
            ListingId,
            Outcome,
            StallId,
            listing::tests::at,
        },
        sqlx::postgres::PgListener,
    };

    fn outcome() -> WinnerOutcome {
        WinnerOutcome {
            listing_id: ListingId(1),
            stall_id: StallId(42),
            kind: Kind::Auction,
            winner_id: Some(ApplicantId(2)),
            winning_entry_id: Some(EntryId(3)),
            outcome: Outcome::Won {
                winner: ApplicantId(2),
                entry: EntryId(3),
            },
            resolved_at: at(3601),
        }
    }

    #[test]
    fn payload_format() {
        let payload = serde_json::to_value(outcome()).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "listingId": 1,
                "stallId": 42,
                "kind": "auction",
                "winnerId": 2,
                "winningEntryId": 3,
                "outcome": { "kind": "won", "winner": 2, "entry": 3 },
                "resolvedAt": "2023-11-14T23:13:21Z",
            })
        );
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_publishes_outcome() {
        let pool = PgPool::connect("postgresql://").await.unwrap();
        let mut listener = PgListener::connect_with(&pool).await.unwrap();
        listener.listen("allocation_outcomes_test").await.unwrap();

        Postgres::new(pool, "allocation_outcomes_test".to_string()).notify(&outcome());
        let notification = listener.recv().await.unwrap();
        let payload: serde_json::Value = serde_json::from_str(notification.payload()).unwrap();
        assert_eq!(payload["winnerId"], 2);
    }
}
