use {
    crate::{ApplicantId, StallId},
    sqlx::PgConnection,
};

/// Whether the applicant may not take part in the allocation of the stall,
/// either because they were disqualified (for this stall or for all stalls)
/// or because they are the stall's last occupant.
pub async fn is_excluded(
    ex: &mut PgConnection,
    applicant_id: ApplicantId,
    stall_id: StallId,
) -> Result<bool, sqlx::Error> {
    const QUERY: &str = r#"
SELECT EXISTS (
    SELECT 1
    FROM disqualifications
    WHERE applicant_id = $1 AND (stall_id IS NULL OR stall_id = $2)
) OR EXISTS (
    SELECT 1
    FROM stalls
    WHERE id = $2 AND last_occupant_id = $1
)
    ;"#;
    sqlx::query_scalar(QUERY)
        .bind(applicant_id)
        .bind(stall_id)
        .fetch_one(ex)
        .await
}

pub async fn insert(
    ex: &mut PgConnection,
    applicant_id: ApplicantId,
    stall_id: Option<StallId>,
    reason: &str,
) -> Result<(), sqlx::Error> {
    const QUERY: &str =
        r#"INSERT INTO disqualifications (applicant_id, stall_id, reason) VALUES ($1, $2, $3);"#;
    sqlx::query(QUERY)
        .bind(applicant_id)
        .bind(stall_id)
        .bind(reason)
        .execute(ex)
        .await?;
    Ok(())
}
