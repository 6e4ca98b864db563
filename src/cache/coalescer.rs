//! Single-flight execution per cache id.
//!
//! The first caller for an id registers a shared future; callers arriving
//! while it runs await a clone of the same future instead of resolving again.
//! The flight future owns the whole miss path, so it completes (and stores)
//! as long as any caller is still waiting on it.
//!
//! Each flight carries the generation (store epoch) it started at. A caller
//! that observed a newer generation never joins an older flight: it starts a
//! fresh one that takes over the registration.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use tracing::debug;

use super::keys::CacheId;

const METRIC_COALESCED_TOTAL: &str = "fpcache_coalesced_total";

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Registered<T, E> {
    seq: u64,
    generation: u64,
    flight: Flight<T, E>,
}

/// Registry of in-flight resolutions keyed by cache id.
pub struct RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    flights: Arc<DashMap<CacheId, Registered<T, E>>>,
    next_seq: AtomicU64,
}

impl<T, E> RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Run `resolve` for `id` unless a run started at `generation` or later
    /// is already in flight, in which case wait for that run and return its
    /// result.
    ///
    /// Returns the result and whether this caller joined an existing flight.
    pub async fn run_once<F, Fut>(
        &self,
        id: &CacheId,
        generation: u64,
        resolve: F,
    ) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (flight, guard) = match self.flights.entry(id.clone()) {
            Entry::Occupied(occupied) if occupied.get().generation >= generation => {
                (occupied.get().flight.clone(), None)
            }
            Entry::Occupied(mut occupied) => {
                debug!(
                    cache_id = %id,
                    stale_generation = occupied.get().generation,
                    generation,
                    "replacing flight started before an invalidation"
                );
                let (registered, guard) = self.register(id, generation, resolve);
                let flight = registered.flight.clone();
                occupied.insert(registered);
                (flight, Some(guard))
            }
            Entry::Vacant(vacant) => {
                let (registered, guard) = self.register(id, generation, resolve);
                let flight = registered.flight.clone();
                vacant.insert(registered);
                (flight, Some(guard))
            }
        };

        let joined = guard.is_none();
        if joined {
            counter!(METRIC_COALESCED_TOTAL).increment(1);
            debug!(cache_id = %id, "joined in-flight resolution");
        }

        let result = flight.await;
        drop(guard);
        (result, joined)
    }

    fn register<F, Fut>(
        &self,
        id: &CacheId,
        generation: u64,
        resolve: F,
    ) -> (Registered<T, E>, FlightGuard<T, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let registered = Registered {
            seq,
            generation,
            flight: resolve().boxed().shared(),
        };
        let guard = FlightGuard {
            id: id.clone(),
            seq,
            flights: Arc::clone(&self.flights),
        };
        (registered, guard)
    }

    /// Number of resolutions currently registered.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

impl<T, E> Default for RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Deregisters the leader's flight on completion or cancellation.
struct FlightGuard<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    id: CacheId,
    seq: u64,
    flights: Arc<DashMap<CacheId, Registered<T, E>>>,
}

impl<T, E> Drop for FlightGuard<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Only remove our own registration, never a newer flight for the id.
        self.flights
            .remove_if(&self.id, |_, registered| registered.seq == self.seq);
    }
}
