//! Auction and raffle listings. One row per stall per allocation cycle; rows
//! are never deleted, ended listings are the historical record.

use {
    crate::{ApplicantId, EntryId, ListingId, ManagerId, StallId},
    bigdecimal::BigDecimal,
    chrono::{DateTime, Utc},
    sqlx::PgConnection,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "listing_kind", rename_all = "snake_case")]
pub enum ListingKind {
    Auction,
    Raffle,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "listing_status", rename_all = "snake_case")]
pub enum ListingStatus {
    NotStarted,
    Active,
    Ended,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "listing_outcome", rename_all = "snake_case")]
pub enum ListingOutcome {
    Won,
    NoParticipants,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "start_policy", rename_all = "snake_case")]
pub enum StartPolicy {
    FirstEntry,
    Manual,
}

#[derive(Clone, Debug, Eq, PartialEq, sqlx::FromRow)]
pub struct Listing {
    pub id: ListingId,
    pub stall_id: StallId,
    pub kind: ListingKind,
    pub starting_price: Option<BigDecimal>,
    pub duration_seconds: i64,
    pub start_policy: StartPolicy,
    pub status: ListingStatus,
    pub outcome: Option<ListingOutcome>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub winner_id: Option<ApplicantId>,
    pub winning_entry_id: Option<EntryId>,
    pub total_entries: i64,
    pub created_by: ManagerId,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewListing {
    pub stall_id: StallId,
    pub kind: ListingKind,
    pub starting_price: Option<BigDecimal>,
    pub duration_seconds: i64,
    pub start_policy: StartPolicy,
    pub created_by: ManagerId,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, stall_id, kind, starting_price, duration_seconds, start_policy, \
                       status, outcome, start_time, end_time, winner_id, winning_entry_id, \
                       total_entries, created_by, created_at, resolved_at";

pub async fn insert(ex: &mut PgConnection, listing: &NewListing) -> Result<Listing, sqlx::Error> {
    let query = format!(
        r#"
INSERT INTO listings (stall_id, kind, starting_price, duration_seconds, start_policy, created_by, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
RETURNING {COLUMNS}
    ;"#
    );
    sqlx::query_as(&query)
        .bind(listing.stall_id)
        .bind(listing.kind)
        .bind(&listing.starting_price)
        .bind(listing.duration_seconds)
        .bind(listing.start_policy)
        .bind(listing.created_by)
        .bind(listing.created_at)
        .fetch_one(ex)
        .await
}

pub async fn fetch(ex: &mut PgConnection, id: ListingId) -> Result<Option<Listing>, sqlx::Error> {
    let query = format!("SELECT {COLUMNS} FROM listings WHERE id = $1;");
    sqlx::query_as(&query).bind(id).fetch_optional(ex).await
}

/// Fetches the listing and takes a row lock on it that is held until the
/// surrounding transaction ends. All writers of a listing go through this
/// function first which serializes them.
pub async fn fetch_for_update(
    ex: &mut PgConnection,
    id: ListingId,
) -> Result<Option<Listing>, sqlx::Error> {
    let query = format!("SELECT {COLUMNS} FROM listings WHERE id = $1 FOR UPDATE;");
    sqlx::query_as(&query).bind(id).fetch_optional(ex).await
}

/// The open listing of a stall if there is one, otherwise its most recently
/// created one.
pub async fn latest_for_stall(
    ex: &mut PgConnection,
    stall_id: StallId,
) -> Result<Option<Listing>, sqlx::Error> {
    let query = format!(
        r#"
SELECT {COLUMNS}
FROM listings
WHERE stall_id = $1
ORDER BY (status <> 'ended') DESC, created_at DESC, id DESC
LIMIT 1
    ;"#
    );
    sqlx::query_as(&query).bind(stall_id).fetch_optional(ex).await
}

/// Writes back every mutable column of the listing.
pub async fn update(ex: &mut PgConnection, listing: &Listing) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
UPDATE listings
SET status = $2,
    outcome = $3,
    start_time = $4,
    end_time = $5,
    winner_id = $6,
    winning_entry_id = $7,
    total_entries = $8,
    resolved_at = $9
WHERE id = $1
    ;"#;
    sqlx::query(QUERY)
        .bind(listing.id)
        .bind(listing.status)
        .bind(listing.outcome)
        .bind(listing.start_time)
        .bind(listing.end_time)
        .bind(listing.winner_id)
        .bind(listing.winning_entry_id)
        .bind(listing.total_entries)
        .bind(listing.resolved_at)
        .execute(ex)
        .await?;
    Ok(())
}

/// Ids of active listings whose deadline is at or before `now`, plus those
/// that ended by expiry at or after `resolved_since`. Oldest deadline first.
pub async fn expired(
    ex: &mut PgConnection,
    now: DateTime<Utc>,
    resolved_since: Option<DateTime<Utc>>,
) -> Result<Vec<ListingId>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT id
FROM listings
WHERE end_time <= $1
  AND (
    status = 'active'
    OR (status = 'ended' AND outcome <> 'cancelled' AND resolved_at >= $2)
  )
ORDER BY end_time ASC, id ASC
    ;"#;
    sqlx::query_scalar(QUERY)
        .bind(now)
        .bind(resolved_since)
        .fetch_all(ex)
        .await
}

/// All listings created by a manager, newest first.
pub async fn by_creator(
    ex: &mut PgConnection,
    created_by: ManagerId,
    kind: Option<ListingKind>,
) -> Result<Vec<Listing>, sqlx::Error> {
    let query = format!(
        r#"
SELECT {COLUMNS}
FROM listings
WHERE created_by = $1 AND ($2::listing_kind IS NULL OR kind = $2)
ORDER BY created_at DESC, id DESC
    ;"#
    );
    sqlx::query_as(&query)
        .bind(created_by)
        .bind(kind)
        .fetch_all(ex)
        .await
}
