//! Lazily initialized value container with optional TTL invalidation.
//!
//! Used to cache environment policies that are expensive to load. Two
//! flavors exist:
//!
//! * [`Lazy::opportunistic`] — initialization is unguarded; a failure leaves
//!   the container uninitialized so a later `get` retries. Concurrent calls
//!   may both run the initializer, the last completed write wins.
//! * [`Lazy::pessimistic`] — initialization is serialized; concurrent
//!   callers wait for the single in-flight initializer, and a failure is
//!   cached until the TTL discards it.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};

type Initializer<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

enum Slot<T, E> {
    Empty,
    Value { value: T, at: Instant },
    Failure { error: E, at: Instant },
}

#[derive(PartialEq)]
enum Mode {
    Opportunistic,
    Pessimistic,
}

pub struct Lazy<T, E> {
    mode: Mode,
    ttl: Option<Duration>,
    slot: RwLock<Slot<T, E>>,
    init_guard: tokio::sync::Mutex<()>,
    init: Initializer<T, E>,
}

impl<T, E> Lazy<T, E>
where
    T: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    /// Creates a container whose initializer reruns after every failure.
    pub fn opportunistic<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::new(Mode::Opportunistic, init)
    }

    /// Creates a container with a single guarded initializer that caches
    /// failures.
    pub fn pessimistic<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::new(Mode::Pessimistic, init)
    }

    fn new<F, Fut>(mode: Mode, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            mode,
            ttl: None,
            slot: RwLock::new(Slot::Empty),
            init_guard: tokio::sync::Mutex::new(()),
            init: Box::new(move || Box::pin(init())),
        }
    }

    /// Discards the cached value or failure once it is `ttl` old.
    pub fn reinitialize_after(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Drops whatever is cached so the next `get` reinitializes.
    pub fn reset(&self) {
        *self.slot.write().unwrap() = Slot::Empty;
    }

    /// Returns the cached value, initializing it first if necessary.
    pub async fn get(&self) -> Result<T, E> {
        if let Some(hit) = self.cached() {
            return hit;
        }
        match self.mode {
            Mode::Opportunistic => {
                let result = (self.init)().await;
                let mut slot = self.slot.write().unwrap();
                *slot = match &result {
                    Ok(value) => Slot::Value {
                        value: value.clone(),
                        at: Instant::now(),
                    },
                    // Leave the slot empty so the next get() retries.
                    Err(_) => Slot::Empty,
                };
                result
            }
            Mode::Pessimistic => {
                let _guard = self.init_guard.lock().await;
                if let Some(hit) = self.cached() {
                    return hit;
                }
                let result = (self.init)().await;
                let mut slot = self.slot.write().unwrap();
                *slot = match &result {
                    Ok(value) => Slot::Value {
                        value: value.clone(),
                        at: Instant::now(),
                    },
                    Err(error) => Slot::Failure {
                        error: error.clone(),
                        at: Instant::now(),
                    },
                };
                result
            }
        }
    }

    fn cached(&self) -> Option<Result<T, E>> {
        let slot = self.slot.read().unwrap();
        match &*slot {
            Slot::Empty => None,
            Slot::Value { value, at } if self.fresh(*at) => Some(Ok(value.clone())),
            Slot::Failure { error, at } if self.fresh(*at) => Some(Err(error.clone())),
            _ => None,
        }
    }

    fn fresh(&self, at: Instant) -> bool {
        match self.ttl {
            None => true,
            Some(ttl) => at.elapsed() < ttl,
        }
    }
}
