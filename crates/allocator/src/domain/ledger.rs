//! The record of bids (auctions) and participation entries (raffles) of a
//! listing. Entries are immutable once written.

use {
    super::{
        clock::Timestamp,
        listing::{Kind, ListingId},
    },
    bigdecimal::BigDecimal,
    serde::{Deserialize, Serialize},
    std::{cmp::Ordering, collections::HashSet},
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
pub struct EntryId(pub i64);

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
pub struct ApplicantId(pub i64);

/// A monetary amount in the stall's rental currency.
#[derive(
    Clone,
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
pub struct Amount(pub BigDecimal);

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value.into())
    }
}

impl Amount {
    /// Smallest unit amounts are expressed in, as decimal places.
    pub const SCALE: i64 = 2;

    pub fn is_negative(&self) -> bool {
        self.0 < BigDecimal::from(0)
    }

    /// Whether the amount can be expressed in whole cents. Finer amounts
    /// would compare differently than they are paid.
    pub fn is_whole_cents(&self) -> bool {
        self.0.with_scale(Self::SCALE) == self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub listing_id: ListingId,
    pub applicant_id: ApplicantId,
    /// Only set for auction bids.
    pub amount: Option<Amount>,
    pub timestamp: Timestamp,
    /// Whether this is the current highest bid of its auction.
    pub is_leading: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEntry {
    pub listing_id: ListingId,
    pub applicant_id: ApplicantId,
    pub amount: Option<Amount>,
    pub timestamp: Timestamp,
}

/// Total order of auction bids: highest amount first, earliest bid wins ties.
/// The id is a last resort for bids with identical timestamps.
pub fn bid_order(a: &Entry, b: &Entry) -> Ordering {
    b.amount
        .cmp(&a.amount)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

/// The bid that currently leads an auction.
pub fn leading(entries: &[Entry]) -> Option<&Entry> {
    entries
        .iter()
        .filter(|entry| entry.amount.is_some())
        .min_by(|a, b| bid_order(a, b))
}

/// What a new bid has to beat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MinimumBid {
    /// No bids yet, the starting price is enough.
    AtLeast(Amount),
    /// The leading bid has to be strictly exceeded.
    Above(Amount),
}

impl std::fmt::Display for MinimumBid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtLeast(amount) => write!(f, "at least {amount}"),
            Self::Above(amount) => write!(f, "more than {amount}"),
        }
    }
}

impl MinimumBid {
    pub fn admits(&self, amount: &Amount) -> bool {
        match self {
            Self::AtLeast(minimum) => amount >= minimum,
            Self::Above(minimum) => amount > minimum,
        }
    }
}

/// Why a submission was turned away by the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    BidTooLow(MinimumBid),
    DuplicateParticipant,
}

/// All entries of one listing as of the moment they were loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ledger {
    kind: Kind,
    /// In insertion order.
    entries: Vec<Entry>,
}

impl Ledger {
    pub fn new(kind: Kind, mut entries: Vec<Entry>) -> Self {
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self { kind, entries }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn leading(&self) -> Option<&Entry> {
        match self.kind {
            Kind::Auction => leading(&self.entries),
            Kind::Raffle => None,
        }
    }

    /// Entries in their natural order: auctions by bid order, raffles by
    /// participation time.
    pub fn entries(&self) -> Vec<Entry> {
        let mut entries = self.entries.clone();
        if self.kind == Kind::Auction {
            entries.sort_by(bid_order);
        }
        entries
    }

    /// Entries in insertion order.
    pub fn in_insertion_order(&self) -> &[Entry] {
        &self.entries
    }

    pub fn unique_participants(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.applicant_id)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn has_entry_from(&self, applicant: ApplicantId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.applicant_id == applicant)
    }

    pub fn minimum_bid(&self, starting_price: &Amount) -> MinimumBid {
        match self.leading().and_then(|entry| entry.amount.clone()) {
            Some(amount) => MinimumBid::Above(amount),
            None => MinimumBid::AtLeast(starting_price.clone()),
        }
    }

    /// Checks whether a bid (`amount` set) or raffle entry (`amount` unset)
    /// may be appended. The caller has already matched the submission to the
    /// listing kind.
    pub fn admit(
        &self,
        applicant: ApplicantId,
        amount: Option<&Amount>,
        starting_price: &Amount,
    ) -> Result<(), Rejection> {
        match amount {
            Some(amount) => {
                let minimum = self.minimum_bid(starting_price);
                if minimum.admits(amount) {
                    Ok(())
                } else {
                    Err(Rejection::BidTooLow(minimum))
                }
            }
            None if self.has_entry_from(applicant) => Err(Rejection::DuplicateParticipant),
            None => Ok(()),
        }
    }

    /// Records an appended entry and moves the leading flag to the new top
    /// bid. Used by stores to keep the loaded ledger in sync with what they
    /// wrote.
    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
        if self.kind == Kind::Auction {
            let top = leading(&self.entries).map(|entry| entry.id);
            for entry in &mut self.entries {
                entry.is_leading = Some(entry.id) == top;
            }
        }
    }
}
