//! In-flight request coalescing.
//!
//! Concurrent calls that share an identity are collapsed into one underlying
//! request. The request runs as its own task, so its registration is removed
//! the moment it settles even if every waiter has gone away, and one waiter
//! dropping out never cancels the outcome for the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use http::Method;
use parking_lot::Mutex;
use tokio::task::JoinError;
use tracing::debug;

use crate::pipeline::ResourceRequest;

/// Settles once, yields the same outcome to every waiter.
pub type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct InFlight<T, E> {
    id: u64,
    outcome: SharedOutcome<T, E>,
}

type Registry<T, E> = Arc<Mutex<HashMap<String, InFlight<T, E>>>>;

// == Dedupe Coordinator ==
pub struct DedupeCoordinator<T, E> {
    in_flight: Registry<T, E>,
    allowed_methods: Vec<Method>,
    next_id: AtomicU64,
}

impl<T, E> std::fmt::Debug for DedupeCoordinator<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupeCoordinator")
            .field("allowed_methods", &self.allowed_methods)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl<T, E> Default for DedupeCoordinator<T, E> {
    fn default() -> Self {
        Self::new(vec![Method::GET, Method::HEAD, Method::OPTIONS])
    }
}

impl<T, E> DedupeCoordinator<T, E> {
    pub fn new(allowed_methods: Vec<Method>) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            allowed_methods,
            next_id: AtomicU64::new(0),
        }
    }

    /// False for bypassed requests and methods outside the allow-list.
    pub fn should_dedupe(&self, request: &ResourceRequest) -> bool {
        !request.bypass_dedupe && self.allowed_methods.contains(&request.method)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_in_flight(&self, identity: &str) -> bool {
        self.in_flight.lock().contains_key(identity)
    }
}

impl<T, E> DedupeCoordinator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    /// Joins the pending request for `identity`, or starts one with `perform`.
    ///
    /// `perform` is only invoked when nothing is pending and is called with
    /// the registry locked, so it must just build the future.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use resource_cache::dedupe::DedupeCoordinator;
    /// use resource_cache::FetchError;
    ///
    /// let dedupe: DedupeCoordinator<String, FetchError> = DedupeCoordinator::default();
    /// let users = dedupe
    ///     .execute("GET /users", || async { Ok("users".to_string()) })
    ///     .await?;
    ///
    /// assert_eq!(users, "users");
    /// assert_eq!(dedupe.in_flight_count(), 0);
    /// # Ok::<(), FetchError>(())
    /// # }).unwrap();
    /// ```
    pub async fn execute<F, Fut>(&self, identity: &str, perform: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let outcome = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(identity) {
                Some(pending) => {
                    debug!(identity, "Joining in-flight request");
                    pending.outcome.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.start(identity.to_string(), id, perform());
                    in_flight.insert(
                        identity.to_string(),
                        InFlight {
                            id,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };

        outcome.await
    }

    fn start<Fut>(&self, identity: String, id: u64, request: Fut) -> SharedOutcome<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let registry = Arc::downgrade(&self.in_flight);
        let task = tokio::spawn(async move {
            let result = request.await;
            if let Some(registry) = registry.upgrade() {
                let mut in_flight = registry.lock();
                // A later request may already own the slot.
                if in_flight.get(&identity).is_some_and(|pending| pending.id == id) {
                    in_flight.remove(&identity);
                }
            }
            result
        });

        async move { task.await.unwrap_or_else(|err| Err(E::from(err))) }
            .boxed()
            .shared()
    }
}
