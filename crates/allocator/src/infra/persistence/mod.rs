//! Durable storage of listings, their ledgers and the availability flag of the
//! stalls they allocate.
//!
//! Every write goes through a [`Transaction`] that holds the exclusive lock of
//! exactly one listing. Changes only become visible on [`Transaction::commit`];
//! dropping a transaction discards them.

use crate::domain::{
    self,
    Kind,
    Ledger,
    Listing,
    ListingId,
    ManagerId,
    NewListing,
    StallId,
    Timestamp,
    ledger::{Entry, NewEntry},
};

pub mod dto;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "test-util"))]
pub use memory::Memory;
pub use postgres::Postgres;

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Inserts a `NotStarted` listing. Fails if the stall is unknown,
    /// unavailable or already has a listing that has not ended.
    async fn create_listing(&self, listing: NewListing, now: Timestamp) -> Result<Listing, Error>;

    /// Locks the listing until the returned transaction is committed or
    /// dropped. Concurrent callers for the same listing wait for each other.
    async fn begin(&self, id: ListingId) -> Result<Box<dyn Transaction>, Error>;

    /// The open listing of the stall, or its most recent one if all ended.
    async fn find_by_stall(&self, stall: StallId) -> Result<Option<ListingId>, Error>;

    /// Consistent copy of a listing and its ledger without taking the lock.
    async fn snapshot(&self, id: ListingId) -> Result<Option<(Listing, Ledger)>, Error>;

    /// Active listings whose deadline is at or before `now`, followed by the
    /// listings that ended by expiry at or after `resolved_since`. Ordered by
    /// deadline.
    async fn expired(
        &self,
        now: Timestamp,
        resolved_since: Option<Timestamp>,
    ) -> Result<Vec<ListingId>, Error>;

    /// Listings created by the manager, newest first.
    async fn by_creator(
        &self,
        manager: ManagerId,
        kind: Option<Kind>,
    ) -> Result<Vec<(Listing, Ledger)>, Error>;
}

#[async_trait::async_trait]
pub trait Transaction: Send {
    /// The listing as of the moment the lock was taken, including changes
    /// saved through this transaction.
    fn listing(&self) -> &Listing;

    /// The ledger including entries appended through this transaction.
    fn ledger(&self) -> &Ledger;

    /// Appends an entry and moves the leading flag of auctions to the new
    /// top bid.
    async fn append(&mut self, entry: NewEntry) -> Result<Entry, Error>;

    /// Writes back all mutable fields of the listing.
    async fn save(&mut self, listing: &Listing) -> Result<(), Error>;

    async fn set_stall_available(&mut self, available: bool) -> Result<(), Error>;

    async fn commit(self: Box<Self>) -> Result<(), Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("listing not found")]
    ListingNotFound,
    #[error("stall not found")]
    StallNotFound,
    #[error("stall is not available")]
    StallUnavailable,
    #[error("stall already has an open listing")]
    OpenListingExists,
    #[error("applicant already has an entry")]
    DuplicateEntry,
    #[error("transaction conflicted with a concurrent one")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<Error> for domain::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::ListingNotFound => Self::ListingNotFound,
            Error::StallNotFound => Self::StallNotFound,
            Error::StallUnavailable => Self::StallUnavailable,
            Error::OpenListingExists => Self::StallHasOpenListing,
            Error::DuplicateEntry => Self::DuplicateParticipant,
            Error::Conflict => Self::StorageConflict,
            Error::Other(err) => Self::Storage(err),
        }
    }
}
