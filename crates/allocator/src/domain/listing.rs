//! A listing is one auction or raffle cycle bound to exactly one stall. It
//! moves through `NotStarted -> Active -> Ended` and never back.

use {
    super::{
        clock::Timestamp,
        ledger::{Amount, ApplicantId, EntryId},
    },
    serde::{Deserialize, Serialize},
};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ListingId(pub i64);

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct StallId(pub i64);

/// Branch manager (or admin) that created a listing.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ManagerId(pub i64);

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
    Auction,
    Raffle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotStarted,
    Active,
    Ended,
}

/// How a listing's clock gets started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartPolicy {
    /// The first valid bid or entry starts the clock.
    #[default]
    FirstEntry,
    /// The creator starts the clock explicitly.
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    Won {
        winner: ApplicantId,
        entry: EntryId,
    },
    /// The deadline passed without a single bid or entry.
    NoParticipants,
    Cancelled,
}

impl Outcome {
    pub fn winner(&self) -> Option<ApplicantId> {
        match self {
            Self::Won { winner, .. } => Some(*winner),
            Self::NoParticipants | Self::Cancelled => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Won { .. } => "won",
            Self::NoParticipants => "no_participants",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The state a listing is in at a given instant. Unlike [`Status`] this
/// accounts for a deadline that passed without anybody resolving the listing
/// yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Running { remaining: chrono::Duration },
    /// Active but the deadline has passed. Must be resolved before anything
    /// else happens to the listing.
    Due,
    Ended,
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("listing {id} can not go from {from:?} to {to:?}")]
    Invalid {
        id: ListingId,
        from: Phase,
        to: Status,
    },
    #[error("listing {0} would end beyond the representable time range")]
    DeadlineOutOfRange(ListingId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewListing {
    pub stall_id: StallId,
    pub kind: Kind,
    /// Required for auctions, ignored for raffles.
    pub starting_price: Option<Amount>,
    pub duration: chrono::Duration,
    pub start_policy: StartPolicy,
    pub created_by: ManagerId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listing {
    pub id: ListingId,
    pub stall_id: StallId,
    pub kind: Kind,
    pub starting_price: Option<Amount>,
    pub duration: chrono::Duration,
    pub start_policy: StartPolicy,
    pub status: Status,
    /// Set together with `end_time` when the listing becomes active.
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    /// Set together with `resolved_at` when the listing ends.
    pub outcome: Option<Outcome>,
    pub resolved_at: Option<Timestamp>,
    pub total_entries: u64,
    pub created_by: ManagerId,
    pub created_at: Timestamp,
}

impl Listing {
    pub fn phase(&self, now: Timestamp) -> Phase {
        match (self.status, self.end_time) {
            (Status::NotStarted, _) => Phase::NotStarted,
            (Status::Ended, _) => Phase::Ended,
            (Status::Active, Some(end)) if now >= end => Phase::Due,
            (Status::Active, Some(end)) => Phase::Running {
                remaining: end - now,
            },
            // Active listings always have a deadline. Treat a missing one as
            // due so it gets resolved instead of running forever.
            (Status::Active, None) => Phase::Due,
        }
    }

    pub fn winner(&self) -> Option<ApplicantId> {
        self.outcome.as_ref().and_then(Outcome::winner)
    }

    /// The starting price of an auction; raffles have none and bids against
    /// them are rejected before this matters.
    pub fn minimum_price(&self) -> Amount {
        self.starting_price.clone().unwrap_or_else(|| Amount::from(0))
    }

    /// `NotStarted -> Active`. Starts the clock at `now`.
    pub fn activate(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        match self.phase(now) {
            Phase::NotStarted => {
                let end = now
                    .checked_add_signed(self.duration)
                    .ok_or(TransitionError::DeadlineOutOfRange(self.id))?;
                self.status = Status::Active;
                self.start_time = Some(now);
                self.end_time = Some(end);
                Ok(())
            }
            from => Err(self.invalid(from, Status::Active)),
        }
    }

    /// `Active -> Ended` once the deadline has passed. Never ends a listing
    /// early.
    pub fn expire(&mut self, outcome: Outcome, now: Timestamp) -> Result<(), TransitionError> {
        match self.phase(now) {
            Phase::Due if outcome != Outcome::Cancelled => {
                self.end(outcome, now);
                Ok(())
            }
            from => Err(self.invalid(from, Status::Ended)),
        }
    }

    /// Ends a listing nobody has committed to yet: one that has not started,
    /// or one that was started manually and has no entries.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        match self.phase(now) {
            Phase::NotStarted => {
                self.end(Outcome::Cancelled, now);
                Ok(())
            }
            Phase::Running { .. } if self.total_entries == 0 => {
                self.end(Outcome::Cancelled, now);
                Ok(())
            }
            from => Err(self.invalid(from, Status::Ended)),
        }
    }

    fn end(&mut self, outcome: Outcome, now: Timestamp) {
        self.status = Status::Ended;
        self.outcome = Some(outcome);
        self.resolved_at = Some(now);
    }

    fn invalid(&self, from: Phase, to: Status) -> TransitionError {
        TransitionError::Invalid {
            id: self.id,
            from,
            to,
        }
    }
}
