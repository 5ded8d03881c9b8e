//! Read-only projections of listings. Building them never changes state.

use super::{
    clock::Timestamp,
    ledger::{Amount, ApplicantId, Entry, Ledger},
    listing::{Kind, Listing, ListingId, ManagerId, Outcome, Phase, StallId, StartPolicy, Status},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeRemaining {
    /// The clock has not been started yet.
    Waiting,
    Running(std::time::Duration),
    /// The deadline has passed, whether or not the listing was resolved.
    Expired,
}

impl TimeRemaining {
    fn of(listing: &Listing, now: Timestamp) -> Self {
        match listing.phase(now) {
            Phase::NotStarted => Self::Waiting,
            Phase::Running { remaining } => {
                // `Running` is only reported with a positive remainder.
                Self::Running(remaining.to_std().unwrap_or_default())
            }
            Phase::Due => Self::Expired,
            Phase::Ended => match listing.end_time {
                Some(_) => Self::Expired,
                // Cancelled before it ever started.
                None => Self::Waiting,
            },
        }
    }

    /// Remaining time clamped to zero.
    pub fn duration(&self) -> std::time::Duration {
        match self {
            Self::Running(remaining) => *remaining,
            Self::Waiting | Self::Expired => std::time::Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingView {
    pub listing_id: ListingId,
    pub stall_id: StallId,
    pub kind: Kind,
    pub status: Status,
    pub start_policy: StartPolicy,
    pub starting_price: Option<Amount>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub leading_bid: Option<Entry>,
    pub total_entries: u64,
    pub winner_id: Option<ApplicantId>,
    pub outcome: Option<Outcome>,
    pub time_remaining: TimeRemaining,
    pub created_by: ManagerId,
    pub created_at: Timestamp,
}

impl ListingView {
    pub fn new(listing: &Listing, ledger: &Ledger, now: Timestamp) -> Self {
        Self {
            listing_id: listing.id,
            stall_id: listing.stall_id,
            kind: listing.kind,
            status: listing.status,
            start_policy: listing.start_policy,
            starting_price: listing.starting_price.clone(),
            start_time: listing.start_time,
            end_time: listing.end_time,
            leading_bid: ledger.leading().cloned(),
            total_entries: listing.total_entries,
            winner_id: listing.winner(),
            outcome: listing.outcome,
            time_remaining: TimeRemaining::of(listing, now),
            created_by: listing.created_by,
            created_at: listing.created_at,
        }
    }

    /// Human readable remaining time, e.g. "1h 4m 0s".
    pub fn time_remaining_label(&self) -> String {
        match self.time_remaining {
            TimeRemaining::Waiting => match self.kind {
                Kind::Auction => "Waiting for bidders".to_string(),
                Kind::Raffle => "Waiting for participants".to_string(),
            },
            TimeRemaining::Expired => "Expired".to_string(),
            TimeRemaining::Running(remaining) => {
                let seconds = remaining.as_secs();
                format!(
                    "{}h {}m {}s",
                    seconds / 3600,
                    (seconds % 3600) / 60,
                    seconds % 60
                )
            }
        }
    }
}

/// A listing together with its complete history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Details {
    pub view: ListingView,
    /// Bids by rank for auctions, entries by participation time for raffles.
    pub entries: Vec<Entry>,
    pub unique_participants: usize,
}

impl Details {
    pub fn new(listing: &Listing, ledger: &Ledger, now: Timestamp) -> Self {
        Self {
            view: ListingView::new(listing, ledger, now),
            entries: ledger.entries(),
            unique_participants: ledger.unique_participants(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub total: usize,
    pub not_started: usize,
    pub active: usize,
    pub ended: usize,
}

/// All listings of one manager, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overview {
    pub listings: Vec<ListingView>,
    pub counts: Counts,
}

impl FromIterator<ListingView> for Overview {
    fn from_iter<I: IntoIterator<Item = ListingView>>(iter: I) -> Self {
        let mut overview = Self::default();
        for view in iter {
            overview.counts.total += 1;
            match view.status {
                Status::NotStarted => overview.counts.not_started += 1,
                Status::Active => overview.counts.active += 1,
                Status::Ended => overview.counts.ended += 1,
            }
            overview.listings.push(view);
        }
        overview
    }
}
