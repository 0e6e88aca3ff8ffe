//! The process table.
//!
//! [`ProcessTable`] is the whole of the simulated kernel state: the live
//! processes, the pid allocation cursor, per-syscall success counters, the
//! event log and the last failure. It is an explicit value, owned by whoever
//! drives it, and every engine call takes it by `&mut`. Independent
//! simulations share nothing.

use std::fmt;

use pgroup_tree::{PID_MAX, Pid, Row, Snapshot};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::{
    log::{Event, EventLog},
    syscall::{self, Kind, Syscall},
};

/// Number of processes the table can hold at once. Pid 0 is never handed
/// out, every other id below [`PID_MAX`] is.
pub const CAPACITY: usize = PID_MAX as usize - 1;

/// Errors produced by [`ProcessTable`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every allocatable pid is held by a live process
    #[error("pid range exhausted: {live} processes are live")]
    RangeExhausted {
        /// Number of live processes
        live: usize,
    },
    /// A process with this pid is already live
    #[error("pid {0} is already live")]
    DuplicatePid(Pid),
    /// The pid is zero or outside of the pid namespace
    #[error("pid {0} cannot be held by a process")]
    InvalidPid(Pid),
    /// The init process is absent
    #[error("init process {0} is missing")]
    MissingInit(Pid),
}

/// A simulated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Process {
    /// Process id
    pub pid: Pid,
    /// Process group id
    pub pgid: Pid,
    /// Session id
    pub sid: Pid,
    /// Parent process id
    pub ppid: Pid,
    /// Exit code, set once the process exits
    pub exit_code: i32,
}

impl Process {
    /// Create a new [`Process`]
    #[must_use]
    pub const fn new(pid: Pid, pgid: Pid, sid: Pid, ppid: Pid) -> Self {
        Self {
            pid,
            pgid,
            sid,
            ppid,
            exit_code: 0,
        }
    }

    /// Whether this process leads its own process group.
    #[must_use]
    pub const fn is_group_leader(&self) -> bool {
        self.pid == self.pgid
    }

    /// Whether this process leads its own session.
    #[must_use]
    pub const fn is_session_leader(&self) -> bool {
        self.pid == self.sid
    }

    /// The snapshot row of this process.
    #[must_use]
    pub const fn row(&self) -> Row {
        Row::new(self.pid, self.pgid, self.sid, self.ppid)
    }
}

impl From<Row> for Process {
    fn from(row: Row) -> Self {
        Self::new(row.pid, row.pgid, row.sid, row.ppid)
    }
}

/// Successful syscalls, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Successful `fork` calls
    pub fork: u64,
    /// Successful `setsid` calls
    pub setsid: u64,
    /// Successful `setpgid` calls
    pub setpgid: u64,
    /// Successful `exit` calls
    pub exit: u64,
}

impl Counters {
    /// Successful calls of `kind`.
    #[must_use]
    pub const fn get(&self, kind: Kind) -> u64 {
        match kind {
            Kind::Fork => self.fork,
            Kind::Setsid => self.setsid,
            Kind::Setpgid => self.setpgid,
            Kind::Exit => self.exit,
        }
    }

    /// Successful calls of every kind.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.fork + self.setsid + self.setpgid + self.exit
    }

    fn increment(&mut self, kind: Kind) {
        match kind {
            Kind::Fork => self.fork += 1,
            Kind::Setsid => self.setsid += 1,
            Kind::Setpgid => self.setpgid += 1,
            Kind::Exit => self.exit += 1,
        }
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fork={} setsid={} setpgid={} exit={}",
            self.fork, self.setsid, self.setpgid, self.exit
        )
    }
}

/// The live process set and everything the engine records about it.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    processes: Vec<Process>,
    in_use: FxHashSet<Pid>,
    last_pid: Pid,
    init_pid: Pid,
    counters: Counters,
    log: EventLog,
    last_error: Option<syscall::Error>,
    last_exited: Option<Process>,
}

impl ProcessTable {
    /// Boot a table holding only the init process `(init, init, init, 0)`.
    ///
    /// # Errors
    ///
    /// Function will error if `init_pid` is zero or outside of the pid
    /// namespace.
    pub fn new(init_pid: Pid) -> Result<Self, Error> {
        let mut table = Self::empty(init_pid)?;
        table.add(Process::new(init_pid, init_pid, init_pid, 0))?;
        Ok(table)
    }

    /// Load a table from `snapshot`. Counters start at zero and the log
    /// starts empty.
    ///
    /// # Errors
    ///
    /// Function will error if two rows share a pid, if a row holds pid 0 or
    /// if no row holds `init_pid`.
    pub fn from_snapshot(snapshot: &Snapshot, init_pid: Pid) -> Result<Self, Error> {
        let mut table = Self::empty(init_pid)?;
        for row in snapshot.rows() {
            table.add(Process::from(*row))?;
        }
        if !table.in_use.contains(&init_pid) {
            return Err(Error::MissingInit(init_pid));
        }
        Ok(table)
    }

    fn empty(init_pid: Pid) -> Result<Self, Error> {
        if init_pid == 0 || init_pid >= PID_MAX {
            return Err(Error::InvalidPid(init_pid));
        }
        Ok(Self {
            processes: Vec::new(),
            in_use: FxHashSet::default(),
            last_pid: init_pid,
            init_pid,
            counters: Counters::default(),
            log: EventLog::default(),
            last_error: None,
            last_exited: None,
        })
    }

    /// Find a free pid.
    ///
    /// The cursor scans upward from the last pid handed out, wrapping modulo
    /// [`PID_MAX`] and skipping 0 and every live pid. The pid is not
    /// reserved until a process holding it is added.
    ///
    /// # Errors
    ///
    /// Function will error if the table is at [`CAPACITY`].
    pub fn allocate_pid(&mut self) -> Result<Pid, Error> {
        if self.processes.len() >= CAPACITY {
            return Err(Error::RangeExhausted {
                live: self.processes.len(),
            });
        }
        while self.last_pid == 0 || self.in_use.contains(&self.last_pid) {
            self.last_pid = (self.last_pid + 1) % PID_MAX;
        }
        Ok(self.last_pid)
    }

    /// Insert `process`.
    ///
    /// # Errors
    ///
    /// Function will error if the pid is already live, zero or out of range.
    pub fn add(&mut self, process: Process) -> Result<(), Error> {
        if process.pid == 0 || process.pid >= PID_MAX {
            return Err(Error::InvalidPid(process.pid));
        }
        if !self.in_use.insert(process.pid) {
            return Err(Error::DuplicatePid(process.pid));
        }
        self.processes.push(process);
        Ok(())
    }

    /// Remove and return the process with `pid`, if live.
    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        let index = self.processes.iter().position(|p| p.pid == pid)?;
        self.in_use.remove(&pid);
        Some(self.processes.remove(index))
    }

    /// The live process with `pid`.
    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        if !self.in_use.contains(&pid) {
            return None;
        }
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        if !self.in_use.contains(&pid) {
            return None;
        }
        self.processes.iter_mut().find(|p| p.pid == pid)
    }

    /// The live process with `pid`.
    ///
    /// # Errors
    ///
    /// Function will error with [`syscall::Error::NotFound`] if no live
    /// process holds `pid`.
    pub fn lookup(&self, pid: Pid) -> Result<&Process, syscall::Error> {
        self.get(pid).ok_or(syscall::Error::NotFound(pid))
    }

    /// Whether a live process holds `pid`.
    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        self.in_use.contains(&pid)
    }

    /// Live processes in table order.
    #[must_use]
    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    /// Number of live processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether no process is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// The pid orphans are reparented to.
    #[must_use]
    pub fn init_pid(&self) -> Pid {
        self.init_pid
    }

    /// Live processes in session `sid`.
    pub fn session_members(&self, sid: Pid) -> impl Iterator<Item = &Process> {
        self.processes.iter().filter(move |p| p.sid == sid)
    }

    /// Live processes in process group `pgid`.
    pub fn group_members(&self, pgid: Pid) -> impl Iterator<Item = &Process> {
        self.processes.iter().filter(move |p| p.pgid == pgid)
    }

    /// Session of process group `pgid`, taken from its first member in table
    /// order. `None` if the group has no live member.
    #[must_use]
    pub fn group_session(&self, pgid: Pid) -> Option<Pid> {
        self.group_members(pgid).next().map(|p| p.sid)
    }

    /// Export the live processes, in table order.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.processes.iter().map(Process::row).collect()
    }

    /// Per-kind success counters.
    #[must_use]
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// The event log.
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Start recording events.
    pub fn enable_logging(&mut self) {
        self.log.enable();
    }

    /// Stop recording events. Already recorded events are kept.
    pub fn disable_logging(&mut self) {
        self.log.disable();
    }

    /// Drop every recorded event.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// The most recent syscall failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<syscall::Error> {
        self.last_error
    }

    /// Human readable reason of the most recent failure, empty if nothing
    /// has failed yet.
    #[must_use]
    pub fn error_reason(&self) -> String {
        self.last_error.map(|e| e.to_string()).unwrap_or_default()
    }

    /// The most recently exited process, with its exit code.
    #[must_use]
    pub fn last_exited(&self) -> Option<&Process> {
        self.last_exited.as_ref()
    }

    /// Rewrite the parent of every child of `parent` to `init`.
    pub(crate) fn reparent(&mut self, parent: Pid, init: Pid) {
        for process in self.processes.iter_mut().filter(|p| p.ppid == parent) {
            process.ppid = init;
        }
    }

    pub(crate) fn record_exit(&mut self, process: Process) {
        self.last_exited = Some(process);
    }

    /// Account for one attempted syscall: bump the counter on success,
    /// remember the failure otherwise, and log it either way.
    pub(crate) fn commit(&mut self, actor: Pid, call: Syscall, result: Result<i64, syscall::Error>) {
        let retcode = match result {
            Ok(retcode) => {
                self.counters.increment(call.kind());
                retcode
            }
            Err(error) => {
                self.last_error = Some(error);
                syscall::FAILURE
            }
        };
        self.log.record(Event {
            actor,
            call,
            retcode,
        });
    }
}

impl fmt::Display for ProcessTable {
    /// Formats [`ProcessTable`] as a tab separated `ps`-like listing.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.snapshot(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boots_with_init() {
        let table = ProcessTable::new(1).unwrap();
        assert_eq!(table.processes(), &[Process::new(1, 1, 1, 0)]);
        assert_eq!(table.init_pid(), 1);
        assert_eq!(table.counters().total(), 0);
        assert!(table.log().is_empty());
        assert_eq!(table.error_reason(), "");
        assert_eq!(table.snapshot().export(), vec![(1, 1, 1, 0)]);
    }

    #[test]
    fn rejects_invalid_init() {
        assert_eq!(ProcessTable::new(0).unwrap_err(), Error::InvalidPid(0));
        assert_eq!(
            ProcessTable::new(PID_MAX).unwrap_err(),
            Error::InvalidPid(PID_MAX)
        );
    }

    #[test]
    fn allocation_skips_live_pids() {
        let mut table = ProcessTable::new(1).unwrap();
        let pid = table.allocate_pid().unwrap();
        assert_eq!(pid, 2);
        // Not reserved until added.
        assert_eq!(table.allocate_pid().unwrap(), 2);
        table.add(Process::new(2, 1, 1, 1)).unwrap();
        table.add(Process::new(3, 1, 1, 1)).unwrap();
        assert_eq!(table.allocate_pid().unwrap(), 4);
    }

    #[test]
    fn allocation_wraps_and_skips_zero() {
        let snapshot =
            Snapshot::import([(1, 1, 1, 0), (PID_MAX - 1, 1, 1, 1)]).unwrap();
        let mut table = ProcessTable::from_snapshot(&snapshot, 1).unwrap();
        table.last_pid = PID_MAX - 2;
        assert_eq!(table.allocate_pid().unwrap(), PID_MAX - 2);
        table.add(Process::new(PID_MAX - 2, 1, 1, 1)).unwrap();
        assert_eq!(table.allocate_pid().unwrap(), 2);
    }

    #[test]
    fn allocation_exhausts() {
        let mut table = ProcessTable::new(1).unwrap();
        for pid in 2..PID_MAX {
            table.add(Process::new(pid, 1, 1, 1)).unwrap();
        }
        assert_eq!(table.len(), CAPACITY);
        assert_eq!(
            table.allocate_pid().unwrap_err(),
            Error::RangeExhausted { live: CAPACITY }
        );
        table.remove(40_000).unwrap();
        assert_eq!(table.allocate_pid().unwrap(), 40_000);
    }

    #[test]
    fn add_remove_lookup() {
        let mut table = ProcessTable::new(1).unwrap();
        assert_eq!(
            table.add(Process::new(1, 1, 1, 0)).unwrap_err(),
            Error::DuplicatePid(1)
        );
        assert_eq!(
            table.add(Process::new(0, 0, 0, 0)).unwrap_err(),
            Error::InvalidPid(0)
        );
        table.add(Process::new(5, 1, 1, 1)).unwrap();
        assert_eq!(table.lookup(5).unwrap().ppid, 1);
        assert_eq!(table.remove(5).unwrap().pid, 5);
        assert!(table.remove(5).is_none());
        assert_eq!(
            table.lookup(5).unwrap_err(),
            syscall::Error::NotFound(5)
        );
        assert!(!table.contains(5));
    }

    #[test]
    fn snapshot_round_trip() {
        let snapshot =
            Snapshot::import([(1, 1, 1, 0), (4, 4, 1, 1), (9, 4, 1, 4), (12, 12, 12, 9)])
                .unwrap();
        let table = ProcessTable::from_snapshot(&snapshot, 1).unwrap();
        assert_eq!(table.snapshot(), snapshot);
        assert_eq!(table.group_members(4).count(), 2);
        assert_eq!(table.session_members(1).count(), 3);
        assert_eq!(table.group_session(4), Some(1));
        assert_eq!(table.group_session(7), None);
    }

    #[test]
    fn from_snapshot_validates() {
        let duplicate = Snapshot::import([(1, 1, 1, 0), (1, 1, 1, 0)]).unwrap();
        assert_eq!(
            ProcessTable::from_snapshot(&duplicate, 1).unwrap_err(),
            Error::DuplicatePid(1)
        );
        let no_init = Snapshot::import([(2, 2, 2, 0)]).unwrap();
        assert_eq!(
            ProcessTable::from_snapshot(&no_init, 1).unwrap_err(),
            Error::MissingInit(1)
        );
    }

    #[test]
    fn display_is_ps_like() {
        let table = ProcessTable::new(1).unwrap();
        assert_eq!(table.to_string(), "PID\tPGID\tSID\tPPID\n1\t1\t1\t0\n");
    }
}
