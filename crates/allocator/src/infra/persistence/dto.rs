//! Conversions between database rows and domain types.

use {
    crate::domain::{
        self,
        Amount,
        ApplicantId,
        EntryId,
        Kind,
        ListingId,
        ManagerId,
        Outcome,
        StallId,
        StartPolicy,
        Status,
    },
    anyhow::{Context, Result},
    database::{
        ledger_entries::LedgerEntry,
        listings::{self, ListingKind, ListingOutcome, ListingStatus},
    },
};

pub fn kind_from_domain(kind: Kind) -> ListingKind {
    match kind {
        Kind::Auction => ListingKind::Auction,
        Kind::Raffle => ListingKind::Raffle,
    }
}

fn kind_into_domain(kind: ListingKind) -> Kind {
    match kind {
        ListingKind::Auction => Kind::Auction,
        ListingKind::Raffle => Kind::Raffle,
    }
}

fn start_policy_from_domain(policy: StartPolicy) -> listings::StartPolicy {
    match policy {
        StartPolicy::FirstEntry => listings::StartPolicy::FirstEntry,
        StartPolicy::Manual => listings::StartPolicy::Manual,
    }
}

fn status_from_domain(status: Status) -> ListingStatus {
    match status {
        Status::NotStarted => ListingStatus::NotStarted,
        Status::Active => ListingStatus::Active,
        Status::Ended => ListingStatus::Ended,
    }
}

pub fn new_listing_from_domain(
    listing: &domain::NewListing,
    now: domain::Timestamp,
) -> listings::NewListing {
    listings::NewListing {
        stall_id: listing.stall_id.0,
        kind: kind_from_domain(listing.kind),
        starting_price: listing.starting_price.clone().map(|price| price.0),
        duration_seconds: listing.duration.num_seconds(),
        start_policy: start_policy_from_domain(listing.start_policy),
        created_by: listing.created_by.0,
        created_at: now,
    }
}

pub fn listing_from_domain(listing: &domain::Listing) -> Result<listings::Listing> {
    let (outcome, winner_id, winning_entry_id) = match listing.outcome {
        None => (None, None, None),
        Some(Outcome::Won { winner, entry }) => {
            (Some(ListingOutcome::Won), Some(winner.0), Some(entry.0))
        }
        Some(Outcome::NoParticipants) => (Some(ListingOutcome::NoParticipants), None, None),
        Some(Outcome::Cancelled) => (Some(ListingOutcome::Cancelled), None, None),
    };
    Ok(listings::Listing {
        id: listing.id.0,
        stall_id: listing.stall_id.0,
        kind: kind_from_domain(listing.kind),
        starting_price: listing.starting_price.clone().map(|price| price.0),
        duration_seconds: listing.duration.num_seconds(),
        start_policy: start_policy_from_domain(listing.start_policy),
        status: status_from_domain(listing.status),
        outcome,
        start_time: listing.start_time,
        end_time: listing.end_time,
        winner_id,
        winning_entry_id,
        total_entries: i64::try_from(listing.total_entries).context("total entries overflow")?,
        created_by: listing.created_by.0,
        created_at: listing.created_at,
        resolved_at: listing.resolved_at,
    })
}

pub fn listing_into_domain(row: listings::Listing) -> Result<domain::Listing> {
    let outcome = match row.outcome {
        None => None,
        Some(ListingOutcome::Won) => Some(Outcome::Won {
            winner: ApplicantId(row.winner_id.context("won listing without winner")?),
            entry: EntryId(
                row.winning_entry_id
                    .context("won listing without winning entry")?,
            ),
        }),
        Some(ListingOutcome::NoParticipants) => Some(Outcome::NoParticipants),
        Some(ListingOutcome::Cancelled) => Some(Outcome::Cancelled),
    };
    Ok(domain::Listing {
        id: ListingId(row.id),
        stall_id: StallId(row.stall_id),
        kind: kind_into_domain(row.kind),
        starting_price: row.starting_price.map(Amount),
        duration: chrono::Duration::try_seconds(row.duration_seconds)
            .context("duration out of range")?,
        start_policy: match row.start_policy {
            listings::StartPolicy::FirstEntry => StartPolicy::FirstEntry,
            listings::StartPolicy::Manual => StartPolicy::Manual,
        },
        status: match row.status {
            ListingStatus::NotStarted => Status::NotStarted,
            ListingStatus::Active => Status::Active,
            ListingStatus::Ended => Status::Ended,
        },
        start_time: row.start_time,
        end_time: row.end_time,
        outcome,
        resolved_at: row.resolved_at,
        total_entries: u64::try_from(row.total_entries).context("negative total entries")?,
        created_by: ManagerId(row.created_by),
        created_at: row.created_at,
    })
}

pub fn entry_into_domain(row: LedgerEntry) -> domain::Entry {
    domain::Entry {
        id: EntryId(row.id),
        listing_id: ListingId(row.listing_id),
        applicant_id: ApplicantId(row.applicant_id),
        amount: row.amount.map(Amount),
        timestamp: row.created_at,
        is_leading: row.is_leading,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::listing::tests::{at, listing},
    };

    #[test]
    fn listing_survives_the_database() {
        let mut listing = listing(Kind::Auction);
        listing.activate(at(0)).unwrap();
        listing.total_entries = 3;
        listing
            .expire(
                Outcome::Won {
                    winner: ApplicantId(9),
                    entry: EntryId(4),
                },
                at(3600),
            )
            .unwrap();

        let row = listing_from_domain(&listing).unwrap();
        assert_eq!(row.outcome, Some(ListingOutcome::Won));
        assert_eq!(row.winner_id, Some(9));
        assert_eq!(row.duration_seconds, 3600);
        assert_eq!(listing_into_domain(row).unwrap(), listing);
    }

    #[test]
    fn rejects_inconsistent_rows() {
        let mut row = listing_from_domain(&listing(Kind::Raffle)).unwrap();
        row.status = ListingStatus::Ended;
        row.outcome = Some(ListingOutcome::Won);
        assert!(listing_into_domain(row.clone()).is_err());

        row.outcome = None;
        row.total_entries = -1;
        assert!(listing_into_domain(row).is_err());
    }
}
