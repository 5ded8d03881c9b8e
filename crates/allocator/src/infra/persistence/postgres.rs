use {
    super::{Error, Store, Transaction, dto},
    crate::domain::{
        Kind,
        Ledger,
        Listing,
        ListingId,
        ManagerId,
        NewListing,
        StallId,
        Timestamp,
        ledger::{Entry, NewEntry},
    },
    anyhow::Context,
    database::{
        PgTransaction,
        ledger_entries,
        listings::{self, ListingStatus},
        stalls,
    },
    sqlx::{PgConnection, PgPool},
};

/// [`Store`] backed by the `database` crate. The per listing lock is the row
/// lock of `SELECT ... FOR UPDATE`.
#[derive(Clone, Debug)]
pub struct Postgres {
    pool: PgPool,
}

impl Postgres {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read only transaction that sees a single snapshot across statements.
    async fn read(&self) -> Result<PgTransaction<'static>, Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

async fn load(ex: &mut PgConnection, row: listings::Listing) -> Result<(Listing, Ledger), Error> {
    let entries = ledger_entries::fetch_all(ex, row.id)
        .await?
        .into_iter()
        .map(dto::entry_into_domain)
        .collect();
    let listing = dto::listing_into_domain(row)?;
    let ledger = Ledger::new(listing.kind, entries);
    Ok((listing, ledger))
}

#[async_trait::async_trait]
impl Store for Postgres {
    async fn create_listing(&self, new: NewListing, now: Timestamp) -> Result<Listing, Error> {
        let _timer = timer("create_listing");
        let mut tx = self.pool.begin().await?;
        let stall = stalls::fetch_for_update(&mut tx, new.stall_id.0)
            .await?
            .ok_or(Error::StallNotFound)?;
        if let Some(latest) = listings::latest_for_stall(&mut tx, stall.id).await? {
            if latest.status != ListingStatus::Ended {
                return Err(Error::OpenListingExists);
            }
        }
        if !stall.is_available {
            return Err(Error::StallUnavailable);
        }
        let row = listings::insert(&mut tx, &dto::new_listing_from_domain(&new, now)).await?;
        tx.commit().await?;
        Ok(dto::listing_into_domain(row)?)
    }

    async fn begin(&self, id: ListingId) -> Result<Box<dyn Transaction>, Error> {
        let _timer = timer("begin");
        let mut tx = self.pool.begin().await?;
        let row = listings::fetch_for_update(&mut tx, id.0)
            .await?
            .ok_or(Error::ListingNotFound)?;
        let (listing, ledger) = load(&mut tx, row).await?;
        Ok(Box::new(PostgresTransaction {
            tx,
            listing,
            ledger,
        }))
    }

    async fn find_by_stall(&self, stall: StallId) -> Result<Option<ListingId>, Error> {
        let _timer = timer("find_by_stall");
        let mut ex = self.pool.acquire().await?;
        let latest = listings::latest_for_stall(&mut ex, stall.0).await?;
        Ok(latest.map(|row| ListingId(row.id)))
    }

    async fn snapshot(&self, id: ListingId) -> Result<Option<(Listing, Ledger)>, Error> {
        let _timer = timer("snapshot");
        let mut tx = self.read().await?;
        let Some(row) = listings::fetch(&mut tx, id.0).await? else {
            return Ok(None);
        };
        load(&mut tx, row).await.map(Some)
    }

    async fn expired(
        &self,
        now: Timestamp,
        resolved_since: Option<Timestamp>,
    ) -> Result<Vec<ListingId>, Error> {
        let _timer = timer("expired");
        let mut ex = self.pool.acquire().await?;
        let ids = listings::expired(&mut ex, now, resolved_since).await?;
        Ok(ids.into_iter().map(ListingId).collect())
    }

    async fn by_creator(
        &self,
        manager: ManagerId,
        kind: Option<Kind>,
    ) -> Result<Vec<(Listing, Ledger)>, Error> {
        let _timer = timer("by_creator");
        let mut tx = self.read().await?;
        let rows = listings::by_creator(&mut tx, manager.0, kind.map(dto::kind_from_domain)).await?;
        let mut listings = Vec::with_capacity(rows.len());
        for row in rows {
            listings.push(load(&mut tx, row).await?);
        }
        Ok(listings)
    }
}

struct PostgresTransaction {
    tx: PgTransaction<'static>,
    listing: Listing,
    ledger: Ledger,
}

#[async_trait::async_trait]
impl Transaction for PostgresTransaction {
    fn listing(&self) -> &Listing {
        &self.listing
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    async fn append(&mut self, new: NewEntry) -> Result<Entry, Error> {
        let _timer = timer("append");
        let row = ledger_entries::insert(
            &mut self.tx,
            new.listing_id.0,
            new.applicant_id.0,
            new.amount.as_ref().map(|amount| &amount.0),
            new.timestamp,
        )
        .await?;
        let id = row.id;
        if row.amount.is_some() {
            let leading = ledger_entries::recompute_leading(&mut self.tx, new.listing_id.0).await?;
            tracing::trace!(?leading, "recomputed leading bid");
        }
        self.ledger.push(dto::entry_into_domain(row));
        let entry = self
            .ledger
            .in_insertion_order()
            .iter()
            .find(|entry| entry.id.0 == id)
            .cloned()
            .context("appended entry missing from ledger")?;
        Ok(entry)
    }

    async fn save(&mut self, listing: &Listing) -> Result<(), Error> {
        let _timer = timer("save");
        listings::update(&mut self.tx, &dto::listing_from_domain(listing)?).await?;
        self.listing = listing.clone();
        Ok(())
    }

    async fn set_stall_available(&mut self, available: bool) -> Result<(), Error> {
        let _timer = timer("set_stall_available");
        stalls::set_available(&mut self.tx, self.listing.stall_id.0, available).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let _timer = timer("commit");
        self.tx.commit().await?;
        Ok(())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001" | "40P01") => return Self::Conflict,
                // unique_violation
                Some("23505") => match db.constraint() {
                    Some("listings_one_open_per_stall") => return Self::OpenListingExists,
                    Some("ledger_entries_one_raffle_entry") => return Self::DuplicateEntry,
                    Some("ledger_entries_one_leading") => return Self::Conflict,
                    _ => (),
                },
                _ => (),
            }
        }
        Self::Other(err.into())
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
struct Metrics {
    /// Timing of db queries.
    #[metric(name = "allocation_database_queries", labels("type"))]
    database_queries: prometheus::HistogramVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

fn timer(query: &str) -> prometheus::HistogramTimer {
    Metrics::get()
        .database_queries
        .with_label_values(&[query])
        .start_timer()
}
