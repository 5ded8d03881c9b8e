use super::{ledger::MinimumBid, listing::Kind};

/// Everything an allocation operation can fail with. All variants except
/// `StorageConflict` and `Storage` are business rule violations that go
/// straight back to the caller.
#[derive(Debug, thiserror::Error, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Error {
    #[error("no listing found")]
    ListingNotFound,
    #[error("listing is not accepting submissions")]
    ListingNotActive,
    #[error("listing is waiting to be started by its creator")]
    NotStarted,
    #[error("listing has already been started")]
    AlreadyStarted,
    #[error("listing deadline has not passed yet")]
    DeadlineNotReached,
    #[error("operation requires a {expected} listing")]
    WrongKind { expected: Kind },
    #[error("bid too low, it has to be {minimum}")]
    BidTooLow { minimum: MinimumBid },
    #[error("applicant already joined this raffle")]
    DuplicateParticipant,
    #[error("applicant is not eligible for this stall")]
    NotEligible,
    #[error("listing can no longer be cancelled")]
    CannotCancel,
    #[error("listing belongs to another manager")]
    NotAuthorized,
    #[error("stall does not exist")]
    StallNotFound,
    #[error("stall is not available")]
    StallUnavailable,
    #[error("stall already has an open listing")]
    StallHasOpenListing,
    #[error("amount must be a whole number of cents")]
    InvalidAmount,
    #[error("invalid listing: {0}")]
    InvalidListing(&'static str),
    #[error("concurrent modification of the listing")]
    StorageConflict,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        self.into()
    }
}
