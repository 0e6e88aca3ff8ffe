//! The event log.
//!
//! Every attempted syscall, successful or not, is recorded as an [`Event`]
//! while logging is enabled. Persisting the log is left to the caller; its
//! `Display` form is one `actor : call(args) : retcode = n` line per event.

use std::fmt;

use pgroup_tree::Pid;
use serde::Serialize;

use crate::syscall::Syscall;

/// One attempted syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Pid of the process that made the call
    pub actor: Pid,
    /// The call and its arguments
    pub call: Syscall,
    /// Result code, negative on failure
    pub retcode: i64,
}

impl Event {
    /// Whether the call succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.retcode >= 0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {} : retcode = {}",
            self.actor, self.call, self.retcode
        )
    }
}

/// Append-only, switchable record of [`Event`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLog {
    events: Vec<Event>,
    #[serde(skip)]
    enabled: bool,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventLog {
    /// Create a new [`EventLog`]
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            events: Vec::new(),
            enabled,
        }
    }

    /// Append `event`, unless logging is disabled.
    pub fn record(&mut self, event: Event) {
        if self.enabled {
            self.events.push(event);
        }
    }

    /// Whether [`EventLog::record`] keeps events.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start keeping events.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop keeping events.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Drop every event.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Events in the order they were recorded.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Successful events only, in order.
    pub fn successes(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|event| event.is_success())
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no event has been kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Display for EventLog {
    /// One `index: event` line per event.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, event) in self.events.iter().enumerate() {
            writeln!(f, "{index}: {event}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(actor: Pid, call: Syscall, retcode: i64) -> Event {
        Event {
            actor,
            call,
            retcode,
        }
    }

    #[test]
    fn event_lines() {
        assert_eq!(
            event(1, Syscall::Fork, 2).to_string(),
            "1 : fork() : retcode = 2"
        );
        assert_eq!(
            event(2, Syscall::Setpgid { pid: 0, pgid: 3 }, -1).to_string(),
            "2 : setpgid(0, 3) : retcode = -1"
        );
        assert_eq!(
            event(4, Syscall::Exit { code: 7 }, 0).to_string(),
            "4 : exit(7) : retcode = 0"
        );
        assert_eq!(
            event(4, Syscall::Setsid, 0).to_string(),
            "4 : setsid() : retcode = 0"
        );
    }

    #[test]
    fn disabled_log_drops_events() {
        let mut log = EventLog::default();
        assert!(log.is_enabled());
        log.record(event(1, Syscall::Fork, 2));
        log.disable();
        log.record(event(1, Syscall::Fork, 3));
        assert_eq!(log.len(), 1);
        log.enable();
        log.record(event(2, Syscall::Setsid, -1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.successes().count(), 1);
        assert_eq!(
            log.to_string(),
            "0: 1 : fork() : retcode = 2\n1: 2 : setsid() : retcode = -1\n"
        );
        log.clear();
        assert!(log.is_empty());
    }
}
