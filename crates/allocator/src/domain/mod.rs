pub mod clock;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod listing;
pub mod resolver;
pub mod view;

pub use {
    clock::{Clock, Timestamp},
    coordinator::Coordinator,
    error::Error,
    ledger::{Amount, ApplicantId, Entry, EntryId, Ledger},
    listing::{Kind, Listing, ListingId, ManagerId, NewListing, Outcome, StallId, StartPolicy, Status},
    resolver::{Resolution, Resolver, WinnerOutcome},
    view::{Counts, Details, ListingView, Overview, TimeRemaining},
};
