//! Keyed debouncing of change notifications.
//!
//! A burst of `notify` calls for one key collapses into a single fire once
//! the quiet period has elapsed. The scheduler owns no thread: the host loop
//! passes the current instant in and polls [`DebounceScheduler::fire_due`],
//! so fires are delivered on the same loop that delivered the notifications.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// What a retrigger does to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebouncePolicy {
    /// The first change of a burst sets the deadline; later changes are absorbed.
    #[default]
    FirstWins,
    /// Every change pushes the deadline out by another quiet period.
    Restart,
}

#[derive(Debug)]
pub struct DebounceScheduler<K> {
    quiet_period: Duration,
    policy: DebouncePolicy,
    deadlines: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> DebounceScheduler<K> {
    pub fn new(quiet_period: Duration, policy: DebouncePolicy) -> Self {
        Self {
            quiet_period,
            policy,
            deadlines: HashMap::new(),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.policy
    }

    /// Record a change for `key`. Returns true if this call armed a new timer.
    pub fn notify(&mut self, key: K, now: Instant) -> bool {
        let deadline = now + self.quiet_period;
        match self.deadlines.get_mut(&key) {
            Some(existing) => {
                if self.policy == DebouncePolicy::Restart {
                    *existing = deadline;
                }
                false
            }
            None => {
                self.deadlines.insert(key, deadline);
                true
            }
        }
    }

    /// Disarm the timer for `key`. Returns true if one was armed.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn armed_count(&self) -> usize {
        self.deadlines.len()
    }

    /// Earliest pending deadline, for sizing the host loop's wait.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Disarm and return every key whose deadline is at or before `now`,
    /// earliest deadline first.
    pub fn fire_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);

        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }
}
