//! Process local [`Store`] for tests and single instance setups. Each listing
//! sits behind its own async mutex which plays the role of the row lock.

use {
    super::{Error, Store, Transaction},
    crate::domain::{
        Kind,
        Ledger,
        Listing,
        ListingId,
        ManagerId,
        NewListing,
        Outcome,
        StallId,
        Status,
        Timestamp,
        ledger::{Entry, EntryId, NewEntry},
    },
    std::{
        collections::HashMap,
        sync::{Arc, Mutex, PoisonError},
    },
    tokio::sync::OwnedMutexGuard,
};

#[derive(Clone, Debug)]
struct Record {
    listing: Listing,
    ledger: Ledger,
}

#[derive(Clone, Copy, Debug)]
struct Stall {
    is_available: bool,
    /// Listing that has not ended yet, if any.
    open: Option<ListingId>,
    latest: Option<ListingId>,
}

#[derive(Default)]
struct Registry {
    stalls: HashMap<StallId, Stall>,
    listings: HashMap<ListingId, Arc<tokio::sync::Mutex<Record>>>,
    next_listing: i64,
    next_entry: i64,
}

#[derive(Clone, Default)]
pub struct Memory(Arc<Mutex<Registry>>);

impl Memory {
    /// Registers a stall. Existing stalls keep their state.
    pub fn add_stall(&self, id: StallId, is_available: bool) {
        self.registry().stalls.entry(id).or_insert(Stall {
            is_available,
            open: None,
            latest: None,
        });
    }

    pub fn stall_available(&self, id: StallId) -> Option<bool> {
        self.registry()
            .stalls
            .get(&id)
            .map(|stall| stall.is_available)
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, id: ListingId) -> Option<Arc<tokio::sync::Mutex<Record>>> {
        self.registry().listings.get(&id).cloned()
    }
}

#[async_trait::async_trait]
impl Store for Memory {
    async fn create_listing(&self, new: NewListing, now: Timestamp) -> Result<Listing, Error> {
        let mut registry = self.registry();
        let stall = registry
            .stalls
            .get(&new.stall_id)
            .copied()
            .ok_or(Error::StallNotFound)?;
        if stall.open.is_some() {
            return Err(Error::OpenListingExists);
        }
        if !stall.is_available {
            return Err(Error::StallUnavailable);
        }

        registry.next_listing += 1;
        let id = ListingId(registry.next_listing);
        let listing = Listing {
            id,
            stall_id: new.stall_id,
            kind: new.kind,
            starting_price: new.starting_price,
            duration: new.duration,
            start_policy: new.start_policy,
            status: Status::NotStarted,
            start_time: None,
            end_time: None,
            outcome: None,
            resolved_at: None,
            total_entries: 0,
            created_by: new.created_by,
            created_at: now,
        };
        let record = Record {
            listing: listing.clone(),
            ledger: Ledger::new(listing.kind, Vec::new()),
        };
        registry
            .listings
            .insert(id, Arc::new(tokio::sync::Mutex::new(record)));
        registry.stalls.insert(
            new.stall_id,
            Stall {
                open: Some(id),
                latest: Some(id),
                ..stall
            },
        );
        Ok(listing)
    }

    async fn begin(&self, id: ListingId) -> Result<Box<dyn Transaction>, Error> {
        let record = self.record(id).ok_or(Error::ListingNotFound)?;
        let guard = record.lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            working: guard.clone(),
            stall_available: None,
            guard,
            store: self.clone(),
        }))
    }

    async fn find_by_stall(&self, stall: StallId) -> Result<Option<ListingId>, Error> {
        Ok(self
            .registry()
            .stalls
            .get(&stall)
            .and_then(|stall| stall.open.or(stall.latest)))
    }

    async fn snapshot(&self, id: ListingId) -> Result<Option<(Listing, Ledger)>, Error> {
        let Some(record) = self.record(id) else {
            return Ok(None);
        };
        let record = record.lock().await;
        Ok(Some((record.listing.clone(), record.ledger.clone())))
    }

    async fn expired(
        &self,
        now: Timestamp,
        resolved_since: Option<Timestamp>,
    ) -> Result<Vec<ListingId>, Error> {
        let records: Vec<_> = self.registry().listings.values().cloned().collect();
        let mut due = Vec::new();
        for record in records {
            let record = record.lock().await;
            let listing = &record.listing;
            let Some(end) = listing.end_time.filter(|end| *end <= now) else {
                continue;
            };
            let include = match listing.status {
                Status::Active => true,
                Status::Ended => {
                    listing.outcome != Some(Outcome::Cancelled)
                        && resolved_since.is_some_and(|since| {
                            listing.resolved_at.is_some_and(|resolved| resolved >= since)
                        })
                }
                Status::NotStarted => false,
            };
            if include {
                due.push((end, listing.id));
            }
        }
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn by_creator(
        &self,
        manager: ManagerId,
        kind: Option<Kind>,
    ) -> Result<Vec<(Listing, Ledger)>, Error> {
        let records: Vec<_> = self.registry().listings.values().cloned().collect();
        let mut listings = Vec::new();
        for record in records {
            let record = record.lock().await;
            if record.listing.created_by == manager
                && kind.is_none_or(|kind| kind == record.listing.kind)
            {
                listings.push((record.listing.clone(), record.ledger.clone()));
            }
        }
        listings.sort_by(|(a, _), (b, _)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(listings)
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Record>,
    working: Record,
    stall_available: Option<bool>,
    store: Memory,
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    fn listing(&self) -> &Listing {
        &self.working.listing
    }

    fn ledger(&self) -> &Ledger {
        &self.working.ledger
    }

    async fn append(&mut self, new: NewEntry) -> Result<Entry, Error> {
        if new.amount.is_none() && self.working.ledger.has_entry_from(new.applicant_id) {
            return Err(Error::DuplicateEntry);
        }
        let id = {
            let mut registry = self.store.registry();
            registry.next_entry += 1;
            EntryId(registry.next_entry)
        };
        self.working.ledger.push(Entry {
            id,
            listing_id: new.listing_id,
            applicant_id: new.applicant_id,
            amount: new.amount,
            timestamp: new.timestamp,
            is_leading: false,
        });
        self.working
            .ledger
            .in_insertion_order()
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("appended entry {id} vanished").into())
    }

    async fn save(&mut self, listing: &Listing) -> Result<(), Error> {
        self.working.listing = listing.clone();
        Ok(())
    }

    async fn set_stall_available(&mut self, available: bool) -> Result<(), Error> {
        self.stall_available = Some(available);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let Self {
            mut guard,
            working,
            stall_available,
            store,
        } = *self;
        {
            let mut registry = store.registry();
            let stall = registry
                .stalls
                .get_mut(&working.listing.stall_id)
                .ok_or(Error::StallNotFound)?;
            if let Some(available) = stall_available {
                stall.is_available = available;
            }
            if working.listing.status == Status::Ended && stall.open == Some(working.listing.id) {
                stall.open = None;
            }
        }
        *guard = working;
        Ok(())
    }
}
