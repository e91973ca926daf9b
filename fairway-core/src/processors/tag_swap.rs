//! TagSwapMatcher processor.
//!
//! The TagSwapMatcher is responsible for:
//! - Assigning a desired tag directly when nobody holds it
//! - Pairing two requests whose offered and desired tags mirror each other
//!   and exchanging the tags in the ledger
//! - Timing out requests that find no counterpart within the window
//! - Emitting `ScheduledRoundTagUpdate` after every successful change
//!
//! Each guild has one registry of pending requests, keyed by the tag the
//! request offers, behind one lock. Every lookup, insert and removal happens
//! under that lock, so each pending entry is removed exactly once: by the
//! counterpart that matches it, by its own timeout, or by the waiter's drop
//! guard when the caller goes away. The ledger exchange runs after the lock
//! is released, on entries already taken out, and only succeeds if both
//! sides still hold the tags they were matched on.

use crate::config::TagSwapConfig;
use crate::entities::{LedgerError, TagHolding, TagLedger};
use crate::events::{Envelope, EventPublisher};
use fairway_sdk::events::ScheduledRoundTagUpdate;
use fairway_sdk::objects::{GuildId, TagNumber, UserId};
use kanau::processor::Processor;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Public data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRequest {
    pub guild_id: GuildId,
    pub requester: UserId,
    /// The tag the requester holds and offers.
    pub current_tag: TagNumber,
    pub desired_tag: TagNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Nobody held the desired tag; it was assigned directly.
    Assigned,
    /// Tags were exchanged with `counterpart`.
    Swapped { counterpart: UserId },
    /// No reciprocal request arrived within the window.
    TimedOut,
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("tag {0} is already held by the requester")]
    SameTag(TagNumber),

    #[error("user {user} does not hold tag {tag}")]
    NotHolder { user: UserId, tag: TagNumber },

    #[error("a swap offering tag {0} is already pending")]
    AlreadyPending(TagNumber),

    /// The counterpart matched this request but its exchange failed
    #[error("tag exchange failed: {0}")]
    Exchange(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Sent by the side that performed the exchange to the side that waited.
enum Signal {
    Matched(UserId),
    Failed(String),
}

struct PendingSwap {
    ticket: u64,
    requester: UserId,
    desired: TagNumber,
    created_at: Instant,
    notify: oneshot::Sender<Signal>,
}

/// Pending requests of one guild, keyed by offered tag.
///
/// Never held across an `.await`, so a plain mutex is enough and the drop
/// guard can take it synchronously.
type Registry = HashMap<TagNumber, PendingSwap>;

type SharedRegistry = Arc<SyncMutex<Registry>>;

fn lock(registry: &SyncMutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove `offered` from `registry` if it is still the entry with `ticket`.
fn remove_own(registry: &SyncMutex<Registry>, offered: TagNumber, ticket: u64) -> bool {
    let mut pending = lock(registry);
    if pending.get(&offered).is_some_and(|p| p.ticket == ticket) {
        pending.remove(&offered);
        return true;
    }
    false
}

enum Registration {
    Matched(PendingSwap),
    Waiting {
        ticket: u64,
        rx: oneshot::Receiver<Signal>,
    },
}

/// Owned by a waiting request. Dropping it, whether the wait finished or
/// the caller's future was cancelled, withdraws the entry if it is still
/// there.
struct PendingGuard {
    registry: SharedRegistry,
    offered: TagNumber,
    ticket: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if remove_own(&self.registry, self.offered, self.ticket) {
            debug!(offered = %self.offered, "Abandoned swap request withdrawn");
        }
    }
}

// ---------------------------------------------------------------------------
// TagSwapMatcher
// ---------------------------------------------------------------------------

pub struct TagSwapMatcher {
    ledger: Arc<dyn TagLedger>,
    publisher: Arc<dyn EventPublisher>,
    registries: Mutex<HashMap<GuildId, SharedRegistry>>,
    timeout: Duration,
    next_ticket: AtomicU64,
}

impl TagSwapMatcher {
    pub fn new(
        ledger: Arc<dyn TagLedger>,
        publisher: Arc<dyn EventPublisher>,
        config: TagSwapConfig,
    ) -> Self {
        Self {
            ledger,
            publisher,
            registries: Mutex::new(HashMap::new()),
            timeout: config.timeout,
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Swap the requester's tag for `desired_tag`.
    ///
    /// Blocks only the caller, for at most the configured window, while
    /// waiting for a counterpart. A timeout is a normal outcome. Dropping
    /// the returned future withdraws the request.
    pub async fn request_swap(&self, request: SwapRequest) -> Result<SwapOutcome, SwapError> {
        let SwapRequest {
            guild_id,
            requester,
            current_tag,
            desired_tag,
        } = request;

        if current_tag == desired_tag {
            return Err(SwapError::SameTag(current_tag));
        }
        if self.ledger.tag_of(guild_id, requester).await? != Some(current_tag) {
            return Err(SwapError::NotHolder {
                user: requester,
                tag: current_tag,
            });
        }

        // Held tags fall through to matching, including one taken by a
        // concurrent claim a moment ago.
        if self.ledger.claim_tag(guild_id, requester, desired_tag).await? {
            info!(
                guild_id = %guild_id,
                user_id = %requester,
                tag = %desired_tag,
                "Unheld tag assigned"
            );
            self.announce(guild_id, BTreeMap::from([(requester, desired_tag)]))
                .await;
            return Ok(SwapOutcome::Assigned);
        }

        let registry = self.registry(guild_id).await;
        match self.register(&registry, &request)? {
            Registration::Matched(counterpart) => self.exchange(&request, counterpart).await,
            Registration::Waiting { ticket, rx } => {
                let guard = PendingGuard {
                    registry,
                    offered: current_tag,
                    ticket,
                };
                self.wait(guard, &request, rx).await
            }
        }
    }

    /// Number of requests currently waiting in `guild_id`.
    pub async fn pending_count(&self, guild_id: GuildId) -> usize {
        let registry = self.registries.lock().await.get(&guild_id).cloned();
        registry.map_or(0, |registry| lock(&registry).len())
    }

    async fn registry(&self, guild_id: GuildId) -> SharedRegistry {
        self.registries
            .lock()
            .await
            .entry(guild_id)
            .or_default()
            .clone()
    }

    /// Take the reciprocal entry if there is one, otherwise park this
    /// request under the tag it offers.
    fn register(
        &self,
        registry: &SyncMutex<Registry>,
        request: &SwapRequest,
    ) -> Result<Registration, SwapError> {
        let mut pending = lock(registry);

        match pending.entry(request.desired_tag) {
            Entry::Occupied(slot) if slot.get().desired == request.current_tag => {
                return Ok(Registration::Matched(slot.remove()));
            }
            _ => {}
        }

        // An entry past its window whose waiter never came back for it.
        if pending
            .get(&request.current_tag)
            .is_some_and(|p| p.created_at.elapsed() >= self.timeout)
        {
            pending.remove(&request.current_tag);
        }
        if pending.contains_key(&request.current_tag) {
            return Err(SwapError::AlreadyPending(request.current_tag));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (notify, rx) = oneshot::channel();
        pending.insert(
            request.current_tag,
            PendingSwap {
                ticket,
                requester: request.requester,
                desired: request.desired_tag,
                created_at: Instant::now(),
                notify,
            },
        );
        debug!(
            guild_id = %request.guild_id,
            user_id = %request.requester,
            offered = %request.current_tag,
            desired = %request.desired_tag,
            "Swap request waiting for counterpart"
        );
        Ok(Registration::Waiting { ticket, rx })
    }

    async fn exchange(
        &self,
        request: &SwapRequest,
        counterpart: PendingSwap,
    ) -> Result<SwapOutcome, SwapError> {
        let guild_id = request.guild_id;
        // The counterpart offered the tag this request desires.
        let mine = TagHolding {
            user_id: request.requester,
            tag: request.current_tag,
        };
        let theirs = TagHolding {
            user_id: counterpart.requester,
            tag: request.desired_tag,
        };
        if let Err(e) = self.ledger.swap_tags(guild_id, mine, theirs).await {
            warn!(
                guild_id = %guild_id,
                user_id = %request.requester,
                counterpart = %counterpart.requester,
                error = %e,
                "Tag exchange rejected"
            );
            // The waiter may have given up already; nothing to tell then.
            let _ = counterpart.notify.send(Signal::Failed(e.to_string()));
            return Err(e.into());
        }

        let _ = counterpart.notify.send(Signal::Matched(request.requester));
        info!(
            guild_id = %guild_id,
            user_id = %request.requester,
            counterpart = %counterpart.requester,
            waited_ms = counterpart.created_at.elapsed().as_millis() as u64,
            "Tags swapped"
        );
        self.announce(
            guild_id,
            BTreeMap::from([(mine.user_id, theirs.tag), (theirs.user_id, mine.tag)]),
        )
        .await;
        Ok(SwapOutcome::Swapped {
            counterpart: counterpart.requester,
        })
    }

    async fn wait(
        &self,
        guard: PendingGuard,
        request: &SwapRequest,
        mut rx: oneshot::Receiver<Signal>,
    ) -> Result<SwapOutcome, SwapError> {
        let signal = match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(signal) => signal,
            Err(_) => {
                if remove_own(&guard.registry, guard.offered, guard.ticket) {
                    debug!(
                        guild_id = %request.guild_id,
                        user_id = %request.requester,
                        offered = %request.current_tag,
                        "Swap request timed out"
                    );
                    return Ok(SwapOutcome::TimedOut);
                }
                // Matched just before the deadline; the result is on its way.
                rx.await
            }
        };
        drop(guard);

        match signal {
            Ok(Signal::Matched(counterpart)) => Ok(SwapOutcome::Swapped { counterpart }),
            Ok(Signal::Failed(reason)) => Err(SwapError::Exchange(reason)),
            Err(_) => Ok(SwapOutcome::TimedOut),
        }
    }

    async fn announce(&self, guild_id: GuildId, changed_tags: BTreeMap<UserId, TagNumber>) {
        let envelope = Envelope::originate(guild_id, ScheduledRoundTagUpdate { changed_tags });
        if let Err(e) = self.publisher.publish(envelope).await {
            warn!(guild_id = %guild_id, error = %e, "Failed to publish tag update");
        }
    }
}

// ---------------------------------------------------------------------------
// Processor trait implementation
// ---------------------------------------------------------------------------

impl Processor<SwapRequest> for TagSwapMatcher {
    type Output = SwapOutcome;
    type Error = SwapError;

    async fn process(&self, request: SwapRequest) -> Result<SwapOutcome, SwapError> {
        self.request_swap(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DeliveryReceiver, InMemoryBus, RoundEvent};
    use crate::framework::MemoryProcessor;

    const G: GuildId = GuildId(1);

    struct Fixture {
        matcher: Arc<TagSwapMatcher>,
        ledger: Arc<MemoryProcessor>,
        bus: Arc<InMemoryBus>,
        _deliveries: DeliveryReceiver,
    }

    async fn fixture(holders: &[(u64, u32)]) -> Fixture {
        let ledger = Arc::new(MemoryProcessor::new());
        for (user, tag) in holders {
            assert!(ledger.claim_tag(G, UserId(*user), TagNumber(*tag)).await.unwrap());
        }
        let (bus, deliveries) = InMemoryBus::new(16, 3);
        let bus = Arc::new(bus);
        let matcher = Arc::new(TagSwapMatcher::new(
            ledger.clone(),
            bus.clone(),
            TagSwapConfig::default(),
        ));
        Fixture {
            matcher,
            ledger,
            bus,
            _deliveries: deliveries,
        }
    }

    fn swap(user: u64, current: u32, desired: u32) -> SwapRequest {
        SwapRequest {
            guild_id: G,
            requester: UserId(user),
            current_tag: TagNumber(current),
            desired_tag: TagNumber(desired),
        }
    }

    async fn wait_for_pending(matcher: &TagSwapMatcher, count: usize) {
        while matcher.pending_count(G).await < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reciprocal_requests_swap_once() {
        for _ in 0..25 {
            let f = fixture(&[(1, 5), (2, 9)]).await;
            let mut tap = f.bus.subscribe();

            let a = tokio::spawn({
                let matcher = f.matcher.clone();
                async move { matcher.request_swap(swap(1, 5, 9)).await }
            });
            let b = tokio::spawn({
                let matcher = f.matcher.clone();
                async move { matcher.request_swap(swap(2, 9, 5)).await }
            });

            let a = a.await.unwrap().unwrap();
            let b = b.await.unwrap().unwrap();
            assert_eq!(a, SwapOutcome::Swapped { counterpart: UserId(2) });
            assert_eq!(b, SwapOutcome::Swapped { counterpart: UserId(1) });
            assert_eq!(f.matcher.pending_count(G).await, 0);
            assert_eq!(f.ledger.tag_of(G, UserId(1)).await.unwrap(), Some(TagNumber(9)));
            assert_eq!(f.ledger.tag_of(G, UserId(2)).await.unwrap(), Some(TagNumber(5)));

            assert_eq!(f.bus.events_published(), 1);
            let RoundEvent::ScheduledRoundTagUpdate(update) = tap.recv().await.unwrap().event
            else {
                panic!("expected a tag update");
            };
            assert_eq!(
                update.changed_tags,
                BTreeMap::from([(UserId(1), TagNumber(9)), (UserId(2), TagNumber(5))])
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_request_times_out_cleanly() {
        let f = fixture(&[(1, 5), (2, 9)]).await;

        let outcome = f.matcher.request_swap(swap(1, 5, 9)).await.unwrap();

        assert_eq!(outcome, SwapOutcome::TimedOut);
        assert_eq!(f.matcher.pending_count(G).await, 0);
        assert_eq!(f.ledger.tag_of(G, UserId(1)).await.unwrap(), Some(TagNumber(5)));
        assert_eq!(f.bus.events_published(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_reciprocal_requests_do_not_match() {
        let f = fixture(&[(1, 5), (2, 9), (3, 7)]).await;

        let a = tokio::spawn({
            let matcher = f.matcher.clone();
            async move { matcher.request_swap(swap(1, 5, 9)).await }
        });
        wait_for_pending(&f.matcher, 1).await;
        let b = f.matcher.request_swap(swap(2, 9, 7)).await.unwrap();

        assert_eq!(b, SwapOutcome::TimedOut);
        assert_eq!(a.await.unwrap().unwrap(), SwapOutcome::TimedOut);
        assert_eq!(f.matcher.pending_count(G).await, 0);
    }

    #[tokio::test]
    async fn test_unheld_tag_is_assigned_directly() {
        let f = fixture(&[(1, 5)]).await;
        let mut tap = f.bus.subscribe();

        let outcome = f.matcher.request_swap(swap(1, 5, 3)).await.unwrap();

        assert_eq!(outcome, SwapOutcome::Assigned);
        assert_eq!(f.ledger.tag_of(G, UserId(1)).await.unwrap(), Some(TagNumber(3)));
        let RoundEvent::ScheduledRoundTagUpdate(update) = tap.recv().await.unwrap().event else {
            panic!("expected a tag update");
        };
        assert_eq!(update.changed_tags, BTreeMap::from([(UserId(1), TagNumber(3))]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections() {
        let f = fixture(&[(1, 5), (2, 9)]).await;

        assert!(matches!(
            f.matcher.request_swap(swap(1, 5, 5)).await,
            Err(SwapError::SameTag(TagNumber(5)))
        ));
        assert!(matches!(
            f.matcher.request_swap(swap(1, 7, 9)).await,
            Err(SwapError::NotHolder { .. })
        ));

        let first = tokio::spawn({
            let matcher = f.matcher.clone();
            async move { matcher.request_swap(swap(1, 5, 9)).await }
        });
        wait_for_pending(&f.matcher, 1).await;
        assert!(matches!(
            f.matcher.request_swap(swap(1, 5, 9)).await,
            Err(SwapError::AlreadyPending(TagNumber(5)))
        ));
        assert_eq!(first.await.unwrap().unwrap(), SwapOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_is_withdrawn() {
        let f = fixture(&[(1, 5), (2, 9)]).await;

        let abandoned = tokio::spawn({
            let matcher = f.matcher.clone();
            async move { matcher.request_swap(swap(1, 5, 9)).await }
        });
        wait_for_pending(&f.matcher, 1).await;
        abandoned.abort();
        assert!(abandoned.await.unwrap_err().is_cancelled());

        assert_eq!(f.matcher.pending_count(G).await, 0);
        let retry = f.matcher.request_swap(swap(1, 5, 9)).await.unwrap();
        assert_eq!(retry, SwapOutcome::TimedOut);
        assert_eq!(f.matcher.pending_count(G).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_does_not_block_new_request() {
        let f = fixture(&[(1, 5), (2, 9)]).await;
        let registry = f.matcher.registry(G).await;
        let (notify, _rx) = oneshot::channel();
        lock(&registry).insert(
            TagNumber(5),
            PendingSwap {
                ticket: u64::MAX,
                requester: UserId(1),
                desired: TagNumber(9),
                created_at: Instant::now(),
                notify,
            },
        );
        tokio::time::advance(f.matcher.timeout).await;

        let outcome = f.matcher.request_swap(swap(1, 5, 9)).await.unwrap();
        assert_eq!(outcome, SwapOutcome::TimedOut);
        assert_eq!(f.matcher.pending_count(G).await, 0);
    }

    /// Yields before every ledger call so concurrent requests interleave.
    struct YieldingLedger(MemoryProcessor);

    #[async_trait::async_trait]
    impl TagLedger for YieldingLedger {
        async fn tag_of(
            &self,
            guild_id: GuildId,
            user_id: UserId,
        ) -> Result<Option<TagNumber>, LedgerError> {
            tokio::task::yield_now().await;
            self.0.tag_of(guild_id, user_id).await
        }

        async fn claim_tag(
            &self,
            guild_id: GuildId,
            user_id: UserId,
            tag: TagNumber,
        ) -> Result<bool, LedgerError> {
            tokio::task::yield_now().await;
            self.0.claim_tag(guild_id, user_id, tag).await
        }

        async fn swap_tags(
            &self,
            guild_id: GuildId,
            a: TagHolding,
            b: TagHolding,
        ) -> Result<(), LedgerError> {
            tokio::task::yield_now().await;
            self.0.swap_tags(guild_id, a, b).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_tag_goes_to_one_requester() {
        let memory = MemoryProcessor::new();
        memory.claim_tag(G, UserId(1), TagNumber(5)).await.unwrap();
        memory.claim_tag(G, UserId(2), TagNumber(9)).await.unwrap();
        let ledger = Arc::new(YieldingLedger(memory));
        let (bus, _deliveries) = InMemoryBus::new(16, 3);
        let bus = Arc::new(bus);
        let matcher = Arc::new(TagSwapMatcher::new(
            ledger.clone(),
            bus.clone(),
            TagSwapConfig::default(),
        ));

        let a = tokio::spawn({
            let matcher = matcher.clone();
            async move { matcher.request_swap(swap(1, 5, 3)).await }
        });
        let b = tokio::spawn({
            let matcher = matcher.clone();
            async move { matcher.request_swap(swap(2, 9, 3)).await }
        });
        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        let assigned = outcomes
            .iter()
            .filter(|o| **o == SwapOutcome::Assigned)
            .count();
        assert_eq!(assigned, 1);
        assert!(outcomes.contains(&SwapOutcome::TimedOut));
        let holders = [
            ledger.tag_of(G, UserId(1)).await.unwrap(),
            ledger.tag_of(G, UserId(2)).await.unwrap(),
        ];
        assert_eq!(holders.iter().filter(|t| **t == Some(TagNumber(3))).count(), 1);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_rejects_tag_moved_while_waiting() {
        let f = fixture(&[(1, 5), (2, 9)]).await;
        let waiting = tokio::spawn({
            let matcher = f.matcher.clone();
            async move { matcher.request_swap(swap(2, 9, 5)).await }
        });
        wait_for_pending(&f.matcher, 1).await;

        // Batch reassignment while user 2 waits: tag 9 moves to user 3.
        assert!(f.ledger.claim_tag(G, UserId(2), TagNumber(11)).await.unwrap());
        assert!(f.ledger.claim_tag(G, UserId(3), TagNumber(9)).await.unwrap());

        let result = f.matcher.request_swap(swap(1, 5, 9)).await;

        assert!(matches!(
            result,
            Err(SwapError::Ledger(LedgerError::NotHeld { user_id: UserId(2), tag: TagNumber(9) }))
        ));
        assert!(matches!(waiting.await.unwrap(), Err(SwapError::Exchange(_))));
        assert_eq!(f.ledger.tag_of(G, UserId(1)).await.unwrap(), Some(TagNumber(5)));
        assert_eq!(f.ledger.tag_of(G, UserId(2)).await.unwrap(), Some(TagNumber(11)));
        assert_eq!(f.ledger.tag_of(G, UserId(3)).await.unwrap(), Some(TagNumber(9)));
        assert_eq!(f.bus.events_published(), 0);
        assert_eq!(f.matcher.pending_count(G).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processor_delegates() {
        let f = fixture(&[(1, 5), (2, 9)]).await;
        let waiting = tokio::spawn({
            let matcher = f.matcher.clone();
            async move { matcher.request_swap(swap(2, 9, 5)).await }
        });
        wait_for_pending(&f.matcher, 1).await;

        let outcome = f.matcher.process(swap(1, 5, 9)).await.unwrap();

        assert_eq!(outcome, SwapOutcome::Swapped { counterpart: UserId(2) });
        assert_eq!(
            waiting.await.unwrap().unwrap(),
            SwapOutcome::Swapped { counterpart: UserId(1) }
        );
    }
}
