use std::time::{Duration, Instant};

/// A memoized value with an expiry, checked on read.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// The cached value, if it has not expired.
    pub fn get(&self) -> Option<T> {
        match &self.entry {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, value: T) {
        self.entry = Some((value, Instant::now() + self.ttl));
    }

    /// Return the cached value or compute and store a fresh one.
    pub fn get_or_refresh(&mut self, refresh: impl FnOnce() -> T) -> T {
        if let Some(value) = self.get() {
            return value;
        }
        let value = refresh();
        self.set(value.clone());
        value
    }
}
