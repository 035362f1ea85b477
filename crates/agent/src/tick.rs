// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collection tick scheduling.
//!
//! With a positive tick length, collection instants are aligned to shared
//! wall-clock boundaries (`floor(now / T + 1) * T`) so every agent in a
//! cluster samples on the same second and the gateway can collate records.
//! With a zero tick length, collection is on demand: exactly one collection
//! per completed action, keyed by a synthetic counter so sub-second
//! collections never collide.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::info;

/// One due collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Record key for the PI frame: the wall clock at collection time, or
    /// the synthetic counter when the tick length is zero. Strictly
    /// monotonically increasing within a session.
    pub key: f64,
    /// The aligned instant the data should describe, passed to getters.
    pub requested_time: f64,
}

/// Wall-clock driven tick scheduler.
#[derive(Debug)]
pub struct TickClock {
    tick_len: u64,
    /// Key of the last collection; -1 before the first one so the zero-tick
    /// counter starts at 0.
    last_key: f64,
    next_collect_time: f64,
    force_collect: bool,
}

impl TickClock {
    pub fn new(tick_len: u64) -> Self {
        let mut clock = Self {
            tick_len,
            last_key: -1.0,
            next_collect_time: 0.0,
            force_collect: false,
        };
        clock.rebase(epoch_secs());
        clock
    }

    /// Arm an immediate collection (collect-after-action, and the first
    /// on-demand collection of a session).
    pub fn force_collect(&mut self) {
        self.force_collect = true;
    }

    /// Check whether a collection is due at `now`, consuming the tick.
    pub fn poll(&mut self, now: f64) -> Option<Tick> {
        if self.tick_len > 0 {
            // Wall clock is not monotonic; if it was turned back by more
            // than a tick, collect immediately and realign.
            if self.last_key - now > self.tick_len as f64 {
                info!("wall clock moved backwards, collecting now and realigning");
                self.last_key = -1.0;
                self.force_collect = true;
                self.rebase(now);
            }
            if now >= self.next_collect_time || self.force_collect {
                let requested_time = self.next_collect_time;
                self.force_collect = false;
                self.last_key = now;
                self.rebase(now);
                return Some(Tick { key: now, requested_time });
            }
            None
        } else if self.force_collect {
            self.force_collect = false;
            self.last_key += 1.0;
            Some(Tick { key: self.last_key, requested_time: 0.0 })
        } else {
            None
        }
    }

    /// How long the session may wait for inbound messages before it must
    /// look at the clock again. Capped at one second so the loop stays
    /// responsive to timeouts and stop requests.
    pub fn sleep_budget(&self, now: f64) -> Duration {
        if self.tick_len > 0 {
            let until_tick = (self.next_collect_time - now).max(0.0);
            Duration::from_secs_f64(until_tick.min(1.0))
        } else {
            Duration::from_secs(1)
        }
    }

    pub fn tick_len(&self) -> u64 {
        self.tick_len
    }

    fn rebase(&mut self, now: f64) {
        if self.tick_len == 0 {
            // next_collect_time is not used for on-demand collection.
            return;
        }
        let tick_len = self.tick_len as f64;
        self.next_collect_time = ((now / tick_len).floor() + 1.0) * tick_len;
    }
}

/// Current wall clock as fractional seconds since the Unix epoch.
pub fn epoch_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
#[path = "tick_tests.rs"]
mod tests;
