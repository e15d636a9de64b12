use std::time::Duration;

use shuttled_core::key::KeyId;
use tokio::time::Instant;

/// Per-key one-shot deadlines, at most one per key.
///
/// The registry never sleeps on its own. The engine loop asks for
/// [`next_deadline`](Self::next_deadline), sleeps until it and then calls
/// [`expire`](Self::expire), so expiry and key events are serialized on one task.
#[derive(Debug)]
pub struct KeyTimerRegistry<T> {
    slots: [Option<(Instant, T)>; KeyId::NUM_KEYS as usize],
}

impl<T> Default for KeyTimerRegistry<T> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl<T> KeyTimerRegistry<T> {
    /// Arm a timer for `key` firing at `now + delay`, replacing any pending one.
    pub fn schedule(&mut self, key: KeyId, delay: Duration, now: Instant, payload: T) {
        self.slots[key.index()] = Some((now + delay, payload));
    }

    /// Disarm the timer for `key`. Returns the payload if one was pending.
    pub fn cancel(&mut self, key: KeyId) -> Option<T> {
        self.slots[key.index()].take().map(|(_, payload)| payload)
    }

    #[must_use]
    #[cfg(test)]
    pub fn is_pending(&self, key: KeyId) -> bool {
        self.slots[key.index()].is_some()
    }

    /// Earliest pending deadline across all keys.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|(at, _)| *at).min()
    }

    /// Remove and return every timer due at `now`, earliest first, ties by key.
    pub fn expire(&mut self, now: Instant) -> Vec<(KeyId, T)> {
        let mut due: Vec<(Instant, KeyId)> = KeyId::all()
            .filter_map(|key| match &self.slots[key.index()] {
                Some((at, _)) if *at <= now => Some((*at, key)),
                _ => None,
            })
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, key)| self.cancel(key).map(|payload| (key, payload)))
            .collect()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
