//! Per-target "update in progress" guards
//!
//! A guard is held while a write runs and stays locked for a short
//! cooldown after it finishes, so a UI double-fire is ignored instead of
//! producing a second, contradictory write.

use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
enum GuardState {
    Held,
    CoolingDown { until: Instant },
}

/// Set of write guards keyed by target
#[derive(Debug)]
pub struct WriteGuards {
    cooldown: Duration,
    guards: Mutex<HashMap<String, GuardState>>,
}

impl WriteGuards {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Take the guard for `key`, or `None` while it is held or cooling down
    pub fn try_acquire(&self, key: &str) -> Option<WriteGuard<'_>> {
        let mut guards = self.guards.lock().unwrap();
        let now = Instant::now();

        match guards.get(key) {
            Some(GuardState::Held) => {
                debug!("Write to {} ignored: in progress", key);
                return None;
            }
            Some(GuardState::CoolingDown { until }) if now < *until => {
                debug!("Write to {} ignored: cooling down", key);
                return None;
            }
            _ => {}
        }

        guards.insert(key.to_string(), GuardState::Held);
        Some(WriteGuard {
            guards: self,
            key: key.to_string(),
        })
    }

    pub fn is_locked(&self, key: &str) -> bool {
        match self.guards.lock().unwrap().get(key) {
            Some(GuardState::Held) => true,
            Some(GuardState::CoolingDown { until }) => Instant::now() < *until,
            None => false,
        }
    }

    fn release(&self, key: &str) {
        let until = Instant::now() + self.cooldown;
        self.guards
            .lock()
            .unwrap()
            .insert(key.to_string(), GuardState::CoolingDown { until });
    }
}

/// Held write guard; starts the cooldown when dropped
#[derive(Debug)]
pub struct WriteGuard<'a> {
    guards: &'a WriteGuards,
    key: String,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.guards.release(&self.key);
    }
}
