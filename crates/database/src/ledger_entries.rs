//! Append-only ledger of auction bids and raffle entries. Raffle entries have
//! no `amount`.

use {
    crate::{ApplicantId, EntryId, ListingId, PgTransaction},
    bigdecimal::BigDecimal,
    chrono::{DateTime, Utc},
    sqlx::PgConnection,
};

#[derive(Clone, Debug, Eq, PartialEq, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub listing_id: ListingId,
    pub applicant_id: ApplicantId,
    pub amount: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
    pub is_leading: bool,
}

pub async fn insert(
    ex: &mut PgConnection,
    listing_id: ListingId,
    applicant_id: ApplicantId,
    amount: Option<&BigDecimal>,
    created_at: DateTime<Utc>,
) -> Result<LedgerEntry, sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO ledger_entries (listing_id, applicant_id, amount, created_at)
VALUES ($1, $2, $3, $4)
RETURNING id, listing_id, applicant_id, amount, created_at, is_leading
    ;"#;
    sqlx::query_as(QUERY)
        .bind(listing_id)
        .bind(applicant_id)
        .bind(amount)
        .bind(created_at)
        .fetch_one(ex)
        .await
}

/// Moves the `is_leading` flag to the highest bid of the listing, earliest
/// bid winning ties. Returns the id of the leading entry.
///
/// The flag is cleared before it is set again because the partial unique
/// index allowing a single leading entry per listing is checked row by row.
pub async fn recompute_leading(
    ex: &mut PgTransaction<'_>,
    listing_id: ListingId,
) -> Result<Option<EntryId>, sqlx::Error> {
    const CLEAR: &str = r#"
UPDATE ledger_entries
SET is_leading = false
WHERE listing_id = $1 AND is_leading
    ;"#;
    const SET: &str = r#"
UPDATE ledger_entries
SET is_leading = true
WHERE id = (
    SELECT id
    FROM ledger_entries
    WHERE listing_id = $1 AND amount IS NOT NULL
    ORDER BY amount DESC, created_at ASC, id ASC
    LIMIT 1
)
RETURNING id
    ;"#;
    sqlx::query(CLEAR)
        .bind(listing_id)
        .execute(&mut **ex)
        .await?;
    sqlx::query_scalar(SET)
        .bind(listing_id)
        .fetch_optional(&mut **ex)
        .await
}

/// All entries of a listing in insertion order.
pub async fn fetch_all(
    ex: &mut PgConnection,
    listing_id: ListingId,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT id, listing_id, applicant_id, amount, created_at, is_leading
FROM ledger_entries
WHERE listing_id = $1
ORDER BY created_at ASC, id ASC
    ;"#;
    sqlx::query_as(QUERY).bind(listing_id).fetch_all(ex).await
}
