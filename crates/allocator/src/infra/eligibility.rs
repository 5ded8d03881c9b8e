use {
    crate::domain::{ApplicantId, StallId},
    sqlx::PgPool,
};

/// Decides whether an applicant may take part in the allocation of a stall.
/// Consulted before a submission takes the listing lock.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait Eligibility: Send + Sync {
    async fn is_eligible(&self, applicant: ApplicantId, stall: StallId) -> anyhow::Result<bool>;
}

/// Lets everybody participate.
pub struct Everyone;

#[async_trait::async_trait]
impl Eligibility for Everyone {
    async fn is_eligible(&self, _: ApplicantId, _: StallId) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Excludes disqualified applicants and the previous occupant of the stall.
pub struct Postgres {
    pool: PgPool,
}

impl Postgres {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Eligibility for Postgres {
    async fn is_eligible(&self, applicant: ApplicantId, stall: StallId) -> anyhow::Result<bool> {
        let mut ex = self.pool.acquire().await?;
        let excluded = database::disqualifications::is_excluded(&mut ex, applicant.0, stall.0).await?;
        Ok(!excluded)
    }
}
