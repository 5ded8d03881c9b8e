//! Picks the winner of a listing whose deadline has passed.

use {
    super::{
        clock::Timestamp,
        ledger::{ApplicantId, EntryId, Ledger},
        listing::{Kind, Listing, ListingId, Outcome, StallId},
    },
    rand::{SeedableRng, rngs::StdRng, seq::SliceRandom},
    serde::Serialize,
    std::sync::{Mutex, PoisonError},
};

/// The result of a resolution as it is handed to the application status and
/// notification pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerOutcome {
    pub listing_id: ListingId,
    pub stall_id: StallId,
    pub kind: Kind,
    pub winner_id: Option<ApplicantId>,
    pub winning_entry_id: Option<EntryId>,
    pub outcome: Outcome,
    pub resolved_at: Timestamp,
}

impl WinnerOutcome {
    /// The recorded outcome of an ended listing.
    pub fn recorded(listing: &Listing) -> Option<Self> {
        let outcome = listing.outcome?;
        let resolved_at = listing.resolved_at?;
        let winning_entry_id = match outcome {
            Outcome::Won { entry, .. } => Some(entry),
            Outcome::NoParticipants | Outcome::Cancelled => None,
        };
        Some(Self {
            listing_id: listing.id,
            stall_id: listing.stall_id,
            kind: listing.kind,
            winner_id: outcome.winner(),
            winning_entry_id,
            outcome,
            resolved_at,
        })
    }
}

/// Result of asking for a listing to be resolved. Finding the work already
/// done is not an error; the recorded outcome is returned instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved(WinnerOutcome),
    AlreadyResolved(WinnerOutcome),
}

impl Resolution {
    pub fn outcome(&self) -> &WinnerOutcome {
        match self {
            Self::Resolved(outcome) | Self::AlreadyResolved(outcome) => outcome,
        }
    }
}

/// Decides winners. Auctions go to the leading bid, raffles to a uniformly
/// random entry.
pub struct Resolver {
    rng: Mutex<StdRng>,
}

impl Resolver {
    /// Raffle draws seeded from the operating system's entropy source.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible raffle draws.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn decide(&self, ledger: &Ledger) -> Outcome {
        let winner = match ledger.kind() {
            Kind::Auction => ledger.leading(),
            Kind::Raffle => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                ledger.in_insertion_order().choose(&mut *rng)
            }
        };
        match winner {
            Some(entry) => Outcome::Won {
                winner: entry.applicant_id,
                entry: entry.id,
            },
            None => Outcome::NoParticipants,
        }
    }
}
