//! The public operations of the allocation core.
//!
//! Every mutation of a listing happens inside a store transaction that holds
//! the listing's lock, so bids, raffle entries, starts, cancellations and
//! resolutions of the same listing are serialized. Expiry is lazy: whoever
//! first touches a listing past its deadline resolves it, be it a submission,
//! an explicit [`Coordinator::resolve`] or the periodic sweep.

use {
    super::{
        Error,
        clock::{Clock, Timestamp},
        ledger::{Amount, ApplicantId, Entry, NewEntry, Rejection},
        listing::{Kind, Listing, ListingId, ManagerId, NewListing, Outcome, Phase, StallId, StartPolicy},
        resolver::{Resolution, Resolver, WinnerOutcome},
        view::{Details, ListingView, Overview},
    },
    crate::infra::{Eligibility, Notifier, Store, Transaction},
    anyhow::anyhow,
    std::{
        future::Future,
        sync::{Arc, Mutex, PoisonError},
    },
    tracing::instrument,
};

/// Longest time a listing may run once started.
const MAX_DURATION_DAYS: i64 = 365;

pub struct Coordinator {
    store: Arc<dyn Store>,
    eligibility: Arc<dyn Eligibility>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    resolver: Resolver,
    max_conflict_retries: usize,
    /// When the previous sweep started.
    last_sweep: Mutex<Option<Timestamp>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        eligibility: Arc<dyn Eligibility>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        resolver: Resolver,
        max_conflict_retries: usize,
    ) -> Self {
        Self {
            store,
            eligibility,
            notifier,
            clock,
            resolver,
            max_conflict_retries,
            last_sweep: Mutex::new(None),
        }
    }

    /// Opens a new auction or raffle for a stall. The listing starts out as
    /// `NotStarted`.
    #[instrument(skip(self))]
    pub async fn create_listing(&self, new: NewListing) -> Result<Listing, Error> {
        if new.duration <= chrono::Duration::zero() {
            return Err(Error::InvalidListing("duration must be positive"));
        }
        if new.duration.subsec_nanos() != 0 {
            return Err(Error::InvalidListing("duration must be whole seconds"));
        }
        if new.duration > chrono::Duration::days(MAX_DURATION_DAYS) {
            return Err(Error::InvalidListing("duration must not exceed a year"));
        }
        let new = match new.kind {
            Kind::Auction => match &new.starting_price {
                None => return Err(Error::InvalidListing("auctions need a starting price")),
                Some(price) if price.is_negative() => {
                    return Err(Error::InvalidListing("starting price must not be negative"));
                }
                Some(price) if !price.is_whole_cents() => return Err(Error::InvalidAmount),
                Some(_) => new,
            },
            Kind::Raffle => NewListing {
                starting_price: None,
                ..new
            },
        };

        let listing = self.store.create_listing(new, self.clock.now()).await?;
        tracing::info!(
            listing_id = %listing.id,
            stall_id = %listing.stall_id,
            kind = %listing.kind,
            "created listing"
        );
        Ok(listing)
    }

    /// Starts the clock of a listing that has not started yet.
    #[instrument(skip(self))]
    pub async fn start_listing(
        &self,
        listing_id: ListingId,
        manager: ManagerId,
    ) -> Result<Listing, Error> {
        self.retrying(|| self.try_start_listing(listing_id, manager))
            .await
    }

    async fn try_start_listing(
        &self,
        listing_id: ListingId,
        manager: ManagerId,
    ) -> Result<Listing, Error> {
        let mut tx = self.store.begin(listing_id).await?;
        let now = self.clock.now();
        let mut listing = tx.listing().clone();
        if listing.created_by != manager {
            return Err(Error::NotAuthorized);
        }
        match listing.phase(now) {
            Phase::NotStarted => (),
            Phase::Running { .. } | Phase::Due => return Err(Error::AlreadyStarted),
            Phase::Ended => return Err(Error::ListingNotActive),
        }
        listing
            .activate(now)
            .map_err(|err| Error::Storage(err.into()))?;
        tx.save(&listing).await?;
        tx.commit().await?;
        tracing::info!(%listing_id, end_time = ?listing.end_time, "started listing");
        Ok(listing)
    }

    /// Places a bid on the auction of a stall. The first valid bid of a
    /// listing that starts on first entry opens its clock.
    #[instrument(skip(self))]
    pub async fn place_bid(
        &self,
        stall: StallId,
        applicant: ApplicantId,
        amount: Amount,
    ) -> Result<Entry, Error> {
        let result = if amount.is_whole_cents() {
            self.submit(Kind::Auction, stall, applicant, Some(&amount))
                .await
        } else {
            Err(Error::InvalidAmount)
        };
        observe_submission(Kind::Auction, &result);
        result
    }

    /// Enters the applicant into the raffle of a stall, at most once.
    #[instrument(skip(self))]
    pub async fn join_raffle(&self, stall: StallId, applicant: ApplicantId) -> Result<Entry, Error> {
        let result = self.submit(Kind::Raffle, stall, applicant, None).await;
        observe_submission(Kind::Raffle, &result);
        result
    }

    async fn submit(
        &self,
        kind: Kind,
        stall: StallId,
        applicant: ApplicantId,
        amount: Option<&Amount>,
    ) -> Result<Entry, Error> {
        let listing_id = self
            .store
            .find_by_stall(stall)
            .await?
            .ok_or(Error::ListingNotFound)?;
        if !self.eligibility.is_eligible(applicant, stall).await? {
            return Err(Error::NotEligible);
        }
        self.retrying(|| self.try_submit(listing_id, kind, applicant, amount))
            .await
    }

    async fn try_submit(
        &self,
        listing_id: ListingId,
        kind: Kind,
        applicant: ApplicantId,
        amount: Option<&Amount>,
    ) -> Result<Entry, Error> {
        let mut tx = self.store.begin(listing_id).await?;
        let now = self.clock.now();
        let mut listing = tx.listing().clone();
        if listing.kind != kind {
            return Err(Error::WrongKind { expected: kind });
        }
        match listing.phase(now) {
            Phase::Running { .. } => (),
            Phase::NotStarted if listing.start_policy == StartPolicy::FirstEntry => (),
            Phase::NotStarted => return Err(Error::NotStarted),
            Phase::Ended => return Err(Error::ListingNotActive),
            Phase::Due => {
                // Nothing is accepted at or after the deadline. Since we hold
                // the lock anyway the listing gets resolved right away.
                self.resolve_locked(tx, now).await?;
                return Err(Error::ListingNotActive);
            }
        }

        tx.ledger()
            .admit(applicant, amount, &listing.minimum_price())
            .map_err(|rejection| match rejection {
                Rejection::BidTooLow(minimum) => Error::BidTooLow { minimum },
                Rejection::DuplicateParticipant => Error::DuplicateParticipant,
            })?;

        if listing.phase(now) == Phase::NotStarted {
            listing
                .activate(now)
                .map_err(|err| Error::Storage(err.into()))?;
            tracing::info!(%listing_id, end_time = ?listing.end_time, "first entry started listing");
        }
        let entry = tx
            .append(NewEntry {
                listing_id,
                applicant_id: applicant,
                amount: amount.cloned(),
                timestamp: now,
            })
            .await?;
        listing.total_entries += 1;
        tx.save(&listing).await?;
        tx.commit().await?;
        tracing::debug!(%listing_id, %applicant, entry_id = %entry.id, "accepted entry");
        Ok(entry)
    }

    /// Current state of the listing of a stall. Never changes anything, a
    /// listing past its deadline is reported as expired but stays active
    /// until it is resolved.
    pub async fn status(&self, stall: StallId) -> Result<ListingView, Error> {
        let listing_id = self
            .store
            .find_by_stall(stall)
            .await?
            .ok_or(Error::ListingNotFound)?;
        let (listing, ledger) = self
            .store
            .snapshot(listing_id)
            .await?
            .ok_or(Error::ListingNotFound)?;
        Ok(ListingView::new(&listing, &ledger, self.clock.now()))
    }

    /// Ends a listing whose deadline has passed and records its winner.
    /// Resolving an ended listing returns its recorded outcome and writes
    /// nothing.
    #[instrument(skip(self))]
    pub async fn resolve(&self, listing_id: ListingId) -> Result<Resolution, Error> {
        self.retrying(|| self.try_resolve(listing_id)).await
    }

    async fn try_resolve(&self, listing_id: ListingId) -> Result<Resolution, Error> {
        let (listing, _) = self
            .store
            .snapshot(listing_id)
            .await?
            .ok_or(Error::ListingNotFound)?;
        if let Some(recorded) = WinnerOutcome::recorded(&listing) {
            return Ok(Resolution::AlreadyResolved(recorded));
        }

        let tx = self.store.begin(listing_id).await?;
        let now = self.clock.now();
        match tx.listing().phase(now) {
            Phase::Due => self.resolve_locked(tx, now).await.map(Resolution::Resolved),
            Phase::Ended => recorded(tx.listing()).map(Resolution::AlreadyResolved),
            Phase::NotStarted | Phase::Running { .. } => Err(Error::DeadlineNotReached),
        }
    }

    /// Decides the winner of a due listing, ends it and updates the stall in
    /// the same transaction. Notifies after the commit.
    async fn resolve_locked(
        &self,
        mut tx: Box<dyn Transaction>,
        now: Timestamp,
    ) -> Result<WinnerOutcome, Error> {
        let mut listing = tx.listing().clone();
        let outcome = self.resolver.decide(tx.ledger());
        listing
            .expire(outcome, now)
            .map_err(|err| Error::Storage(err.into()))?;
        tx.save(&listing).await?;
        // A won stall is taken, one nobody wanted goes back on the market.
        tx.set_stall_available(!matches!(outcome, Outcome::Won { .. }))
            .await?;
        tx.commit().await?;

        let resolved = recorded(&listing)?;
        Metrics::get()
            .resolutions
            .with_label_values(&[outcome.label()])
            .inc();
        tracing::info!(
            listing_id = %listing.id,
            stall_id = %listing.stall_id,
            winner = ?resolved.winner_id,
            outcome = outcome.label(),
            "resolved listing"
        );
        self.notifier.notify(&resolved);
        Ok(resolved)
    }

    /// Resolves every listing whose deadline has passed. Listings that ended
    /// by expiry since the previous sweep started, including the ones
    /// resolved concurrently by somebody else, are reported with their
    /// recorded outcome. A listing failing to resolve is logged and left for
    /// the next sweep.
    pub async fn sweep_expired(&self) -> Result<Vec<Resolution>, Error> {
        let now = self.clock.now();
        let resolved_since = self
            .last_sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(now);
        let due = self.store.expired(now, resolved_since).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = due.len(), "resolving expired listings");

        let results = futures::future::join_all(
            due.into_iter()
                .map(|listing_id| async move { (listing_id, self.resolve(listing_id).await) }),
        )
        .await;
        Ok(results
            .into_iter()
            .filter_map(|(listing_id, result)| match result {
                Ok(resolution) => Some(resolution),
                Err(err) => {
                    tracing::warn!(?err, %listing_id, "failed to resolve expired listing");
                    None
                }
            })
            .collect())
    }

    /// Ends a listing without a winner. Only possible while nobody has
    /// committed to it: before it started or while it runs without entries.
    /// The stall is left untouched.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        listing_id: ListingId,
        manager: ManagerId,
    ) -> Result<WinnerOutcome, Error> {
        self.retrying(|| self.try_cancel(listing_id, manager))
            .await
    }

    async fn try_cancel(
        &self,
        listing_id: ListingId,
        manager: ManagerId,
    ) -> Result<WinnerOutcome, Error> {
        let mut tx = self.store.begin(listing_id).await?;
        let now = self.clock.now();
        let mut listing = tx.listing().clone();
        if listing.created_by != manager {
            return Err(Error::NotAuthorized);
        }
        match listing.phase(now) {
            Phase::Ended => return Err(Error::ListingNotActive),
            Phase::Due => {
                self.resolve_locked(tx, now).await?;
                return Err(Error::CannotCancel);
            }
            Phase::NotStarted | Phase::Running { .. } => (),
        }
        listing.cancel(now).map_err(|_| Error::CannotCancel)?;
        tx.save(&listing).await?;
        tx.commit().await?;

        let cancelled = recorded(&listing)?;
        Metrics::get()
            .resolutions
            .with_label_values(&[Outcome::Cancelled.label()])
            .inc();
        tracing::info!(%listing_id, "cancelled listing");
        self.notifier.notify(&cancelled);
        Ok(cancelled)
    }

    /// A listing with its full history, for its creator.
    pub async fn details(
        &self,
        listing_id: ListingId,
        manager: ManagerId,
    ) -> Result<Details, Error> {
        let (listing, ledger) = self
            .store
            .snapshot(listing_id)
            .await?
            .ok_or(Error::ListingNotFound)?;
        if listing.created_by != manager {
            return Err(Error::NotAuthorized);
        }
        Ok(Details::new(&listing, &ledger, self.clock.now()))
    }

    /// All listings of a manager, optionally only of one kind.
    pub async fn overview(&self, manager: ManagerId, kind: Option<Kind>) -> Result<Overview, Error> {
        let listings = self.store.by_creator(manager, kind).await?;
        let now = self.clock.now();
        Ok(listings
            .iter()
            .map(|(listing, ledger)| ListingView::new(listing, ledger, now))
            .collect())
    }

    /// Runs `attempt` again when it lost a race against a concurrent
    /// transaction, at most `max_conflict_retries` times.
    async fn retrying<T, F, Fut>(&self, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(Error::StorageConflict) => {
                    Metrics::get().storage_conflicts.inc();
                    if retries >= self.max_conflict_retries {
                        return Err(Error::StorageConflict);
                    }
                    retries += 1;
                    tracing::debug!(retries, "retrying after storage conflict");
                }
                result => return result,
            }
        }
    }
}

fn recorded(listing: &Listing) -> Result<WinnerOutcome, Error> {
    WinnerOutcome::recorded(listing)
        .ok_or_else(|| Error::Storage(anyhow!("listing {} ended without outcome", listing.id)))
}

fn observe_submission(kind: Kind, result: &Result<Entry, Error>) {
    let kind: &'static str = kind.into();
    let result = match result {
        Ok(_) => "accepted",
        Err(err) => err.label(),
    };
    Metrics::get()
        .submissions
        .with_label_values(&[kind, result])
        .inc();
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "allocation")]
struct Metrics {
    /// Bids and raffle entries by listing kind and result.
    #[metric(labels("kind", "result"))]
    submissions: prometheus::IntCounterVec,

    /// Ended listings by outcome.
    #[metric(labels("outcome"))]
    resolutions: prometheus::IntCounterVec,

    /// Transactions that conflicted with a concurrent one.
    storage_conflicts: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            domain::{
                clock::Fake,
                ledger::{EntryId, MinimumBid},
                listing::{Status, tests::at},
                view::TimeRemaining,
            },
            infra::{
                eligibility::{Everyone, MockEligibility},
                notify::{Log, MockNotifier},
                persistence::{self, Memory},
            },
        },
        maplit::hashset,
        std::{
            collections::HashSet,
            sync::atomic::{AtomicUsize, Ordering},
        },
    };

    const STALL: StallId = StallId(42);
    const MANAGER: ManagerId = ManagerId(7);

    struct Harness {
        coordinator: Arc<Coordinator>,
        store: Memory,
        clock: Arc<Fake>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(Arc::new(Everyone), Arc::new(Log))
        }

        fn with(eligibility: Arc<dyn Eligibility>, notifier: Arc<dyn Notifier>) -> Self {
            let store = Memory::default();
            store.add_stall(STALL, true);
            Self::with_store(Arc::new(store.clone()), store, eligibility, notifier, 3)
        }

        fn with_store(
            backend: Arc<dyn Store>,
            store: Memory,
            eligibility: Arc<dyn Eligibility>,
            notifier: Arc<dyn Notifier>,
            max_conflict_retries: usize,
        ) -> Self {
            observe::tracing::initialize_reentrant("allocator=debug");
            let clock = Arc::new(Fake::new(at(0)));
            let coordinator = Arc::new(Coordinator::new(
                backend,
                eligibility,
                notifier,
                clock.clone(),
                Resolver::seeded(1),
                max_conflict_retries,
            ));
            Self {
                coordinator,
                store,
                clock,
            }
        }

        async fn create(&self, kind: Kind, start_policy: StartPolicy) -> Listing {
            self.coordinator
                .create_listing(NewListing {
                    stall_id: STALL,
                    kind,
                    starting_price: Some(1000.into()),
                    duration: chrono::Duration::hours(1),
                    start_policy,
                    created_by: MANAGER,
                })
                .await
                .unwrap()
        }

        async fn bid(&self, applicant: i64, amount: i64) -> Result<Entry, Error> {
            self.coordinator
                .place_bid(STALL, ApplicantId(applicant), amount.into())
                .await
        }

        fn advance(&self, seconds: i64) {
            self.clock.advance(chrono::Duration::seconds(seconds));
        }
    }

    #[tokio::test]
    async fn auction_goes_to_highest_bidder() {
        let h = Harness::new();
        let listing = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        assert_eq!(listing.status, Status::NotStarted);

        let first = h.bid(1, 1000).await.unwrap();
        let view = h.coordinator.status(STALL).await.unwrap();
        assert_eq!(view.status, Status::Active);
        assert_eq!(view.end_time, Some(at(3600)));
        assert_eq!(view.leading_bid.map(|entry| entry.id), Some(first.id));

        h.advance(600);
        let second = h.bid(2, 1500).await.unwrap();
        assert!(second.is_leading);
        assert!(matches!(
            h.bid(3, 1500).await,
            Err(Error::BidTooLow {
                minimum: MinimumBid::Above(minimum)
            }) if minimum == Amount::from(1500)
        ));

        h.advance(3001);
        let resolutions = h.coordinator.sweep_expired().await.unwrap();
        assert_eq!(resolutions.len(), 1);
        let Resolution::Resolved(outcome) = &resolutions[0] else {
            panic!("expected a fresh resolution, got {resolutions:?}");
        };
        assert_eq!(outcome.winner_id, Some(ApplicantId(2)));
        assert_eq!(outcome.winning_entry_id, Some(second.id));
        assert_eq!(outcome.resolved_at, at(3601));
        assert_eq!(h.store.stall_available(STALL), Some(false));

        h.advance(5);
        assert_eq!(
            h.coordinator.sweep_expired().await.unwrap(),
            vec![Resolution::AlreadyResolved(outcome.clone())]
        );
        assert_eq!(
            h.coordinator.resolve(listing.id).await.unwrap(),
            Resolution::AlreadyResolved(outcome.clone())
        );
        assert_eq!(h.store.stall_available(STALL), Some(false));
        // Only the sweep right after the resolution repeats it.
        assert!(h.coordinator.sweep_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_bid_must_meet_starting_price() {
        let h = Harness::new();
        h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        assert!(matches!(
            h.bid(1, 999).await,
            Err(Error::BidTooLow {
                minimum: MinimumBid::AtLeast(_)
            })
        ));
        // A rejected bid does not start the clock.
        let view = h.coordinator.status(STALL).await.unwrap();
        assert_eq!(view.status, Status::NotStarted);
        assert_eq!(view.time_remaining, TimeRemaining::Waiting);
        h.bid(1, 1000).await.unwrap();
    }

    #[tokio::test]
    async fn bids_are_whole_cents() {
        let h = Harness::new();
        h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        let amount = |s: &str| Amount(s.parse().unwrap());
        h.coordinator
            .place_bid(STALL, ApplicantId(1), amount("1500"))
            .await
            .unwrap();
        // Would be indistinguishable from the leading bid once stored in cents.
        assert!(matches!(
            h.coordinator
                .place_bid(STALL, ApplicantId(2), amount("1500.004"))
                .await,
            Err(Error::InvalidAmount)
        ));
        let higher = h
            .coordinator
            .place_bid(STALL, ApplicantId(2), amount("1500.01"))
            .await
            .unwrap();
        assert!(higher.is_leading);
        let huge = h
            .coordinator
            .place_bid(STALL, ApplicantId(3), amount("1000000000000000.50"))
            .await
            .unwrap();
        let view = h.coordinator.status(STALL).await.unwrap();
        assert_eq!(view.leading_bid.map(|entry| entry.id), Some(huge.id));
        assert_eq!(view.total_entries, 3);
    }

    #[tokio::test]
    async fn empty_raffle_has_no_participants() {
        let h = Harness::new();
        let listing = h.create(Kind::Raffle, StartPolicy::Manual).await;
        assert_eq!(listing.starting_price, None);
        h.coordinator
            .start_listing(listing.id, MANAGER)
            .await
            .unwrap();

        h.advance(3600);
        let resolution = h.coordinator.resolve(listing.id).await.unwrap();
        assert_eq!(resolution.outcome().outcome, Outcome::NoParticipants);
        assert_eq!(resolution.outcome().winner_id, None);
        assert_eq!(h.store.stall_available(STALL), Some(true));
    }

    #[tokio::test]
    async fn raffle_draws_one_of_the_participants() {
        let h = Harness::new();
        let listing = h.create(Kind::Raffle, StartPolicy::FirstEntry).await;
        for applicant in 1..=5 {
            h.coordinator
                .join_raffle(STALL, ApplicantId(applicant))
                .await
                .unwrap();
        }
        assert!(matches!(
            h.coordinator.join_raffle(STALL, ApplicantId(3)).await,
            Err(Error::DuplicateParticipant)
        ));
        assert!(matches!(
            h.bid(6, 5000).await,
            Err(Error::WrongKind {
                expected: Kind::Auction
            })
        ));

        h.advance(3600);
        let resolution = h.coordinator.resolve(listing.id).await.unwrap();
        let winner = resolution.outcome().winner_id.unwrap();
        assert!((1..=5).contains(&winner.0));

        let details = h.coordinator.details(listing.id, MANAGER).await.unwrap();
        assert_eq!(details.view.total_entries, 5);
        assert_eq!(details.unique_participants, 5);
        assert_eq!(
            details
                .entries
                .iter()
                .map(|entry| entry.applicant_id.0)
                .collect::<HashSet<_>>(),
            hashset! {1, 2, 3, 4, 5}
        );
        assert_eq!(details.view.winner_id, Some(winner));
    }

    #[tokio::test]
    async fn resolve_waits_for_the_deadline() {
        let h = Harness::new();
        let listing = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        assert!(matches!(
            h.coordinator.resolve(listing.id).await,
            Err(Error::DeadlineNotReached)
        ));
        h.bid(1, 1000).await.unwrap();
        h.advance(3599);
        assert!(matches!(
            h.coordinator.resolve(listing.id).await,
            Err(Error::DeadlineNotReached)
        ));
        assert!(matches!(
            h.coordinator.resolve(ListingId(99)).await,
            Err(Error::ListingNotFound)
        ));
    }

    #[tokio::test]
    async fn no_entry_accepted_at_the_deadline() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|outcome| outcome.winner_id == Some(ApplicantId(1)))
            .times(1)
            .return_const(());
        let h = Harness::with(Arc::new(Everyone), Arc::new(notifier));
        let listing = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        h.bid(1, 1000).await.unwrap();

        h.advance(3600);
        let view = h.coordinator.status(STALL).await.unwrap();
        assert_eq!(view.time_remaining, TimeRemaining::Expired);
        assert_eq!(view.status, Status::Active);

        assert!(matches!(h.bid(2, 5000).await, Err(Error::ListingNotActive)));
        // The rejected bid resolved the listing on the way.
        let view = h.coordinator.status(STALL).await.unwrap();
        assert_eq!(view.status, Status::Ended);
        assert_eq!(view.winner_id, Some(ApplicantId(1)));
        assert_eq!(view.total_entries, 1);
        assert!(matches!(
            h.coordinator.resolve(listing.id).await,
            Ok(Resolution::AlreadyResolved(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_equal_bids_accept_one() {
        let h = Harness::new();
        let listing = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        h.bid(1, 1000).await.unwrap();

        let bids = (2..10).map(|applicant| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .place_bid(STALL, ApplicantId(applicant), 1500.into())
                    .await
            })
        });
        let results = futures::future::join_all(bids).await;
        let accepted = results
            .iter()
            .filter(|result| matches!(result, Ok(Ok(_))))
            .count();
        assert_eq!(accepted, 1);

        let (_, ledger) = h.store.snapshot(listing.id).await.unwrap().unwrap();
        assert_eq!(ledger.count(), 2);
        let leading = ledger
            .in_insertion_order()
            .iter()
            .filter(|entry| entry.is_leading)
            .count();
        assert_eq!(leading, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_bids_race_against_resolution() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|outcome| outcome.winner_id == Some(ApplicantId(1)))
            .times(1)
            .return_const(());
        let h = Harness::with(Arc::new(Everyone), Arc::new(notifier));
        let listing = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        let first = h.bid(1, 1000).await.unwrap();
        h.advance(3600);

        let bids = (2..10).map(|applicant| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .place_bid(STALL, ApplicantId(applicant), 5000.into())
                    .await
            })
        });
        let listing_id = listing.id;
        let resolves = (0..4).map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .resolve(listing_id)
                    .await
                    .map(|resolution| vec![resolution])
            })
        });
        let sweeps = (0..4).map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.sweep_expired().await })
        });
        let (bids, resolves, sweeps) = tokio::join!(
            futures::future::join_all(bids),
            futures::future::join_all(resolves),
            futures::future::join_all(sweeps),
        );

        for bid in bids {
            assert!(matches!(bid.unwrap(), Err(Error::ListingNotActive)));
        }
        let resolutions: Vec<Resolution> = resolves
            .into_iter()
            .chain(sweeps)
            .flat_map(|result| result.unwrap().unwrap())
            .collect();
        // A rejected bid may have resolved the listing before any resolver ran.
        let fresh = resolutions
            .iter()
            .filter(|resolution| matches!(resolution, Resolution::Resolved(_)))
            .count();
        assert!(fresh <= 1, "resolved {fresh} times");
        for resolution in &resolutions {
            assert_eq!(resolution.outcome().winning_entry_id, Some(first.id));
        }

        let (stored, ledger) = h.store.snapshot(listing.id).await.unwrap().unwrap();
        assert_eq!(ledger.count(), 1);
        assert_eq!(stored.total_entries, 1);
        assert_eq!(stored.resolved_at, Some(at(3600)));
        assert_eq!(h.store.stall_available(STALL), Some(false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sweeps_resolve_once() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).return_const(());
        let h = Harness::with(Arc::new(Everyone), Arc::new(notifier));
        h.create(Kind::Raffle, StartPolicy::FirstEntry).await;
        for applicant in 1..=3 {
            h.coordinator
                .join_raffle(STALL, ApplicantId(applicant))
                .await
                .unwrap();
        }
        h.advance(3600);

        let sweeps = (0..8).map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.sweep_expired().await })
        });
        let resolutions: Vec<Resolution> = futures::future::join_all(sweeps)
            .await
            .into_iter()
            .flat_map(|result| result.unwrap().unwrap())
            .collect();

        let fresh: Vec<_> = resolutions
            .iter()
            .filter_map(|resolution| match resolution {
                Resolution::Resolved(outcome) => Some(outcome),
                Resolution::AlreadyResolved(_) => None,
            })
            .collect();
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].winner_id.is_some());
        for resolution in &resolutions {
            assert_eq!(resolution.outcome(), fresh[0]);
        }
    }

    #[tokio::test]
    async fn manual_listings_wait_for_their_creator() {
        let h = Harness::new();
        let listing = h.create(Kind::Auction, StartPolicy::Manual).await;
        assert!(matches!(h.bid(1, 1000).await, Err(Error::NotStarted)));
        assert!(matches!(
            h.coordinator.start_listing(listing.id, ManagerId(8)).await,
            Err(Error::NotAuthorized)
        ));

        h.advance(60);
        let started = h
            .coordinator
            .start_listing(listing.id, MANAGER)
            .await
            .unwrap();
        assert_eq!(started.start_time, Some(at(60)));
        assert_eq!(started.end_time, Some(at(3660)));
        assert!(matches!(
            h.coordinator.start_listing(listing.id, MANAGER).await,
            Err(Error::AlreadyStarted)
        ));
        h.bid(1, 1000).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_only_without_entries() {
        let h = Harness::new();
        let listing = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        assert!(matches!(
            h.coordinator.cancel(listing.id, ManagerId(8)).await,
            Err(Error::NotAuthorized)
        ));
        let cancelled = h.coordinator.cancel(listing.id, MANAGER).await.unwrap();
        assert_eq!(cancelled.outcome, Outcome::Cancelled);
        assert_eq!(cancelled.winner_id, None);
        assert_eq!(h.store.stall_available(STALL), Some(true));
        assert!(matches!(
            h.coordinator.cancel(listing.id, MANAGER).await,
            Err(Error::ListingNotActive)
        ));

        // The stall is free for the next cycle.
        let next = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        h.bid(1, 1000).await.unwrap();
        assert!(matches!(
            h.coordinator.cancel(next.id, MANAGER).await,
            Err(Error::CannotCancel)
        ));
        assert_eq!(
            h.coordinator.status(STALL).await.unwrap().listing_id,
            next.id
        );
    }

    #[tokio::test]
    async fn ineligible_applicants_are_rejected() {
        let mut eligibility = MockEligibility::new();
        eligibility
            .expect_is_eligible()
            .returning(|applicant, _| Ok(applicant != ApplicantId(13)));
        let h = Harness::with(Arc::new(eligibility), Arc::new(Log));
        h.create(Kind::Raffle, StartPolicy::FirstEntry).await;

        assert!(matches!(
            h.coordinator.join_raffle(STALL, ApplicantId(13)).await,
            Err(Error::NotEligible)
        ));
        assert_eq!(
            h.coordinator.status(STALL).await.unwrap().status,
            Status::NotStarted
        );
        h.coordinator
            .join_raffle(STALL, ApplicantId(14))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_listing_validation() {
        let h = Harness::new();
        let new = NewListing {
            stall_id: STALL,
            kind: Kind::Auction,
            starting_price: None,
            duration: chrono::Duration::hours(1),
            start_policy: StartPolicy::FirstEntry,
            created_by: MANAGER,
        };
        assert!(matches!(
            h.coordinator.create_listing(new.clone()).await,
            Err(Error::InvalidListing(_))
        ));
        assert!(matches!(
            h.coordinator
                .create_listing(NewListing {
                    starting_price: Some((-1).into()),
                    ..new.clone()
                })
                .await,
            Err(Error::InvalidListing(_))
        ));
        assert!(matches!(
            h.coordinator
                .create_listing(NewListing {
                    kind: Kind::Raffle,
                    duration: chrono::Duration::zero(),
                    ..new.clone()
                })
                .await,
            Err(Error::InvalidListing(_))
        ));
        for duration in [
            chrono::Duration::milliseconds(500),
            chrono::Duration::milliseconds(1500),
            chrono::Duration::days(366),
            chrono::Duration::MAX,
        ] {
            assert!(matches!(
                h.coordinator
                    .create_listing(NewListing {
                        kind: Kind::Raffle,
                        duration,
                        ..new.clone()
                    })
                    .await,
                Err(Error::InvalidListing(_))
            ));
        }
        assert!(matches!(
            h.coordinator
                .create_listing(NewListing {
                    starting_price: Some(Amount("999.999".parse().unwrap())),
                    ..new.clone()
                })
                .await,
            Err(Error::InvalidAmount)
        ));
        assert!(matches!(
            h.coordinator
                .create_listing(NewListing {
                    kind: Kind::Raffle,
                    stall_id: StallId(1),
                    ..new.clone()
                })
                .await,
            Err(Error::StallNotFound)
        ));

        h.create(Kind::Raffle, StartPolicy::FirstEntry).await;
        assert!(matches!(
            h.coordinator
                .create_listing(NewListing {
                    kind: Kind::Raffle,
                    ..new
                })
                .await,
            Err(Error::StallHasOpenListing)
        ));
    }

    #[tokio::test]
    async fn overview_of_a_manager() {
        let h = Harness::new();
        h.store.add_stall(StallId(43), true);
        let first = h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        h.coordinator.cancel(first.id, MANAGER).await.unwrap();
        h.advance(1);
        h.create(Kind::Raffle, StartPolicy::FirstEntry).await;
        h.coordinator
            .join_raffle(STALL, ApplicantId(1))
            .await
            .unwrap();
        h.coordinator
            .create_listing(NewListing {
                stall_id: StallId(43),
                kind: Kind::Raffle,
                starting_price: None,
                duration: chrono::Duration::minutes(5),
                start_policy: StartPolicy::FirstEntry,
                created_by: ManagerId(8),
            })
            .await
            .unwrap();

        let overview = h.coordinator.overview(MANAGER, None).await.unwrap();
        assert_eq!(overview.counts.total, 2);
        assert_eq!(overview.counts.active, 1);
        assert_eq!(overview.counts.ended, 1);
        assert_eq!(overview.listings[1].listing_id, first.id);

        let raffles = h
            .coordinator
            .overview(MANAGER, Some(Kind::Raffle))
            .await
            .unwrap();
        assert_eq!(raffles.counts.total, 1);
        assert_eq!(raffles.listings[0].time_remaining_label(), "1h 0m 0s");

        assert!(matches!(
            h.coordinator.details(first.id, ManagerId(8)).await,
            Err(Error::NotAuthorized)
        ));
    }

    /// Fails the first `conflicts` transactions as if a concurrent writer
    /// had won the race.
    struct Flaky {
        inner: Memory,
        conflicts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Store for Flaky {
        async fn create_listing(
            &self,
            listing: NewListing,
            now: Timestamp,
        ) -> Result<Listing, persistence::Error> {
            self.inner.create_listing(listing, now).await
        }

        async fn begin(
            &self,
            id: ListingId,
        ) -> Result<Box<dyn Transaction>, persistence::Error> {
            let conflict = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if conflict {
                return Err(persistence::Error::Conflict);
            }
            self.inner.begin(id).await
        }

        async fn find_by_stall(
            &self,
            stall: StallId,
        ) -> Result<Option<ListingId>, persistence::Error> {
            self.inner.find_by_stall(stall).await
        }

        async fn snapshot(
            &self,
            id: ListingId,
        ) -> Result<Option<(Listing, crate::domain::Ledger)>, persistence::Error> {
            self.inner.snapshot(id).await
        }

        async fn expired(
            &self,
            now: Timestamp,
            resolved_since: Option<Timestamp>,
        ) -> Result<Vec<ListingId>, persistence::Error> {
            self.inner.expired(now, resolved_since).await
        }

        async fn by_creator(
            &self,
            manager: ManagerId,
            kind: Option<Kind>,
        ) -> Result<Vec<(Listing, crate::domain::Ledger)>, persistence::Error> {
            self.inner.by_creator(manager, kind).await
        }
    }

    fn flaky(conflicts: usize) -> Harness {
        let store = Memory::default();
        store.add_stall(STALL, true);
        let flaky = Flaky {
            inner: store.clone(),
            conflicts: AtomicUsize::new(conflicts),
        };
        Harness::with_store(
            Arc::new(flaky),
            store,
            Arc::new(Everyone),
            Arc::new(Log),
            3,
        )
    }

    #[tokio::test]
    async fn retries_storage_conflicts() {
        let h = flaky(3);
        h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        let entry = h.bid(1, 1000).await.unwrap();
        assert_eq!(entry.amount, Some(1000.into()));
        assert_ne!(entry.id, EntryId(0));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let h = flaky(4);
        h.create(Kind::Auction, StartPolicy::FirstEntry).await;
        assert!(matches!(h.bid(1, 1000).await, Err(Error::StorageConflict)));
        // Nothing was written by the failed attempts.
        assert_eq!(
            h.coordinator.status(STALL).await.unwrap().status,
            Status::NotStarted
        );
    }
}
