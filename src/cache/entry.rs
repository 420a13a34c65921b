//! Stored entries, their freshness, and lookup outcomes.

use std::time::Duration;

use tokio::time::Instant;

/// How usable a stored entry is at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Younger than the fresh TTL; served as is.
    Fresh,
    /// Past the fresh TTL but inside the stale window; served while a
    /// background refresh runs.
    Stale,
    /// Past both windows; never served.
    Expired,
}

impl Freshness {
    /// Classifies an entry of age `age`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use freshcache::Freshness;
    ///
    /// let fresh = Duration::from_secs(10);
    /// let max_age = Duration::from_secs(60);
    /// assert_eq!(Freshness::for_age(Duration::from_secs(9), fresh, max_age), Freshness::Fresh);
    /// assert_eq!(Freshness::for_age(Duration::from_secs(10), fresh, max_age), Freshness::Stale);
    /// assert_eq!(Freshness::for_age(Duration::from_secs(60), fresh, max_age), Freshness::Expired);
    /// ```
    pub fn for_age(age: Duration, fresh_ttl: Duration, max_age: Duration) -> Self {
        if age < fresh_ttl {
            Self::Fresh
        } else if age < max_age {
            Self::Stale
        } else {
            Self::Expired
        }
    }

    pub fn is_servable(self) -> bool {
        !matches!(self, Self::Expired)
    }
}

/// A value together with the moment it was fetched.
#[derive(Debug, Clone)]
pub(crate) struct Entry<V> {
    pub(crate) value: V,
    pub(crate) fetched_at: Instant,
}

impl<V> Entry<V> {
    pub(crate) fn new(value: V) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    pub(crate) fn freshness(&self, now: Instant, fresh_ttl: Duration, max_age: Duration) -> Freshness {
        Freshness::for_age(now.saturating_duration_since(self.fetched_at), fresh_ttl, max_age)
    }
}

/// What a call to [`Cache::get`](super::Cache::get) produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Served from the cache; the entry was fresh.
    Fresh(V),
    /// Served from the cache; the entry was stale and a background refresh
    /// was requested.
    Stale(V),
    /// Fetched from the origin during this call.
    Loaded(V),
    /// The origin reports that the key does not exist.
    Absent,
}

impl<V> Lookup<V> {
    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Fresh(v) | Self::Stale(v) | Self::Loaded(v) => Some(v),
            Self::Absent => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Fresh(v) | Self::Stale(v) | Self::Loaded(v) => Some(v),
            Self::Absent => None,
        }
    }

    /// `true` when the value came out of the cache without origin I/O.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Fresh(_) | Self::Stale(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entry_ages_through_windows() {
        let entry = Entry::new("v");
        let fresh = Duration::from_secs(1);
        let max_age = Duration::from_secs(3);

        assert_eq!(entry.freshness(Instant::now(), fresh, max_age), Freshness::Fresh);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(entry.freshness(Instant::now(), fresh, max_age), Freshness::Stale);
        tokio::time::advance(Duration::from_secs(1)).await;
        let state = entry.freshness(Instant::now(), fresh, max_age);
        assert_eq!(state, Freshness::Expired);
        assert!(!state.is_servable());
    }

    #[test]
    fn zero_stale_window_skips_stale() {
        let ttl = Duration::from_secs(5);
        assert_eq!(Freshness::for_age(ttl, ttl, ttl), Freshness::Expired);
    }

    #[test]
    fn lookup_accessors() {
        assert_eq!(Lookup::Stale(3).value(), Some(&3));
        assert!(Lookup::Fresh(1).is_cached());
        assert!(!Lookup::Loaded(1).is_cached());
        assert_eq!(Lookup::<u8>::Absent.into_value(), None);
        assert!(Lookup::<u8>::Absent.is_absent());
    }
}
