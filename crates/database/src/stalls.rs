//! The slice of the stall registry the allocator reads and writes. Stall
//! rows themselves are owned by the registry.

use {
    crate::{ApplicantId, StallId},
    sqlx::PgConnection,
};

#[derive(Clone, Debug, Eq, PartialEq, sqlx::FromRow)]
pub struct Stall {
    pub id: StallId,
    pub is_available: bool,
    pub last_occupant_id: Option<ApplicantId>,
}

/// Registers a stall. Existing stalls keep their state.
pub async fn insert(
    ex: &mut PgConnection,
    id: StallId,
    is_available: bool,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO stalls (id, is_available)
VALUES ($1, $2)
ON CONFLICT (id) DO NOTHING
    ;"#;
    sqlx::query(QUERY)
        .bind(id)
        .bind(is_available)
        .execute(ex)
        .await?;
    Ok(())
}

/// Fetches the stall and locks its row until the surrounding transaction ends.
pub async fn fetch_for_update(
    ex: &mut PgConnection,
    id: StallId,
) -> Result<Option<Stall>, sqlx::Error> {
    const QUERY: &str =
        r#"SELECT id, is_available, last_occupant_id FROM stalls WHERE id = $1 FOR UPDATE;"#;
    sqlx::query_as(QUERY).bind(id).fetch_optional(ex).await
}

pub async fn set_available(
    ex: &mut PgConnection,
    id: StallId,
    is_available: bool,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"UPDATE stalls SET is_available = $2 WHERE id = $1;"#;
    sqlx::query(QUERY)
        .bind(id)
        .bind(is_available)
        .execute(ex)
        .await?;
    Ok(())
}
