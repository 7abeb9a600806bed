//! Single-flight registry.
//!
//! Collapses concurrent identical builds to one execution: the first
//! caller for a key becomes the leader and does the work; everyone else
//! blocks until the leader's guard drops, then re-checks the cache. The
//! guard completes on drop, so a panicking or failing leader still
//! releases its followers.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

/// Registry of in-flight builds keyed by fingerprint.
#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<String, Arc<Flight>>>,
}

struct Flight {
    done: Mutex<bool>,
    signal: Condvar,
}

/// Outcome of joining a key.
pub enum Role<'a> {
    /// This caller builds; dropping the guard releases the followers.
    Leader(FlightGuard<'a>),
    /// Another caller built while we waited; re-check the cache.
    Follower,
}

impl SingleFlight {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the flight for `key`.
    ///
    /// The leader returns immediately; followers block until the leader's
    /// guard drops.
    pub fn join(&self, key: &str) -> Role<'_> {
        let flight = {
            let mut inflight = self.inflight.lock().expect("single-flight lock");
            match inflight.get(key) {
                Some(flight) => flight.clone(),
                None => {
                    let flight =
                        Arc::new(Flight { done: Mutex::new(false), signal: Condvar::new() });
                    inflight.insert(key.to_string(), flight);
                    return Role::Leader(FlightGuard { owner: self, key: key.to_string() });
                }
            }
        };

        let mut done = flight.done.lock().expect("flight lock");
        while !*done {
            done = flight.signal.wait(done).expect("flight wait");
        }
        Role::Follower
    }

    fn finish(&self, key: &str) {
        let flight = {
            let mut inflight = self.inflight.lock().expect("single-flight lock");
            inflight.remove(key)
        };
        if let Some(flight) = flight {
            let mut done = flight.done.lock().expect("flight lock");
            *done = true;
            flight.signal.notify_all();
        }
    }
}

/// Leadership of one in-flight build. Completion happens on drop.
pub struct FlightGuard<'a> {
    owner: &'a SingleFlight,
    key: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.finish(&self.key);
    }
}
