//! The syscall engine.
//!
//! Four calls, each a pure transition of a [`ProcessTable`] on behalf of an
//! acting pid. A call either applies in full or changes no process at all;
//! either way it is accounted for on the table: counters on success, the
//! last error on failure, and an event log entry if logging is on.
//!
//! The typed functions ([`fork`], [`exit`], [`setsid`], [`setpgid`]) return
//! a `Result`. [`invoke`] is the untyped entry point the event log speaks:
//! it returns a result code, [`FAILURE`] on error, the reason being left on
//! the table.

use std::fmt;

use pgroup_tree::Pid;
use serde::Serialize;

use crate::table::{Process, ProcessTable};

/// Result code of a failed call.
pub const FAILURE: i64 = -1;

/// Errors produced by the syscall engine.
///
/// None of these are fatal. Every variant leaves the table as it was before
/// the call.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Error {
    /// `fork` found no free pid
    #[error("pid range exhausted")]
    RangeExhausted,
    /// The acting process is not live
    #[error("no process with pid {0} in the table")]
    NotFound(Pid),
    /// `setsid` by a process that already leads its session
    #[error("process {0} is already session leader")]
    AlreadyLeader(Pid),
    /// `setpgid` to lead a new group by a session leader
    #[error("self-setting: process {0} is already session leader")]
    AlreadySessionLeader(Pid),
    /// The `setpgid` target is not live
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),
    /// The `setpgid` target leads its session
    #[error("target process {0} is a session leader")]
    TargetIsSessionLeader(Pid),
    /// No live process is in the requested group
    #[error("no such process group: {0}")]
    NoSuchGroup(Pid),
    /// The requested group lives in another session
    #[error("process {pid} in session {sid} cannot join group {pgid} of session {group_sid}")]
    CrossSessionMove {
        /// Target process
        pid: Pid,
        /// Session of the target
        sid: Pid,
        /// Requested group
        pgid: Pid,
        /// Session of the requested group
        group_sid: Pid,
    },
    /// `exit` by the init process
    #[error("init process {0} cannot exit")]
    ImmortalInit(Pid),
}

/// The kinds of syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// `fork()`
    Fork,
    /// `setsid()`
    Setsid,
    /// `setpgid(pid, pgid)`
    Setpgid,
    /// `exit(code)`
    Exit,
}

impl Kind {
    /// Every kind, in counter order.
    pub const ALL: [Kind; 4] = [Kind::Fork, Kind::Setsid, Kind::Setpgid, Kind::Exit];

    /// Name of the syscall.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Fork => "fork",
            Kind::Setsid => "setsid",
            Kind::Setpgid => "setpgid",
            Kind::Exit => "exit",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A syscall with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Syscall {
    /// Create a child of the caller
    Fork,
    /// Remove the caller
    Exit {
        /// Exit code stored on the departing process
        code: i32,
    },
    /// Make the caller lead a new session and group
    Setsid,
    /// Move a process between groups
    Setpgid {
        /// Target process, 0 for the caller
        pid: Pid,
        /// Destination group, 0 for the target's own pid
        pgid: Pid,
    },
}

impl Syscall {
    /// The kind of this call.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        match self {
            Syscall::Fork => Kind::Fork,
            Syscall::Exit { .. } => Kind::Exit,
            Syscall::Setsid => Kind::Setsid,
            Syscall::Setpgid { .. } => Kind::Setpgid,
        }
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syscall::Fork => write!(f, "fork()"),
            Syscall::Exit { code } => write!(f, "exit({code})"),
            Syscall::Setsid => write!(f, "setsid()"),
            Syscall::Setpgid { pid, pgid } => write!(f, "setpgid({pid}, {pgid})"),
        }
    }
}

/// `fork` on behalf of `caller`, returning the child's pid.
///
/// The child inherits the caller's group and session and has the caller for
/// parent.
///
/// # Errors
///
/// Function will error if `caller` is not live or no pid is free.
pub fn fork(table: &mut ProcessTable, caller: Pid) -> Result<Pid, Error> {
    let result = spawn(table, caller);
    table.commit(caller, Syscall::Fork, result.map(i64::from));
    result
}

fn spawn(table: &mut ProcessTable, caller: Pid) -> Result<Pid, Error> {
    let parent = *table.lookup(caller)?;
    let pid = table.allocate_pid().map_err(|_| Error::RangeExhausted)?;
    table
        .add(Process::new(pid, parent.pgid, parent.sid, parent.pid))
        .map_err(|_| Error::RangeExhausted)?;
    Ok(pid)
}

/// `exit` on behalf of `caller`.
///
/// The caller is removed with `code` stored as its exit code, see
/// [`ProcessTable::last_exited`]. Its children are reparented to init.
///
/// # Errors
///
/// Function will error if `caller` is not live or is the init process.
pub fn exit(table: &mut ProcessTable, caller: Pid, code: i32) -> Result<(), Error> {
    let result = terminate(table, caller, code);
    table.commit(caller, Syscall::Exit { code }, result.map(|()| 0));
    result
}

fn terminate(table: &mut ProcessTable, caller: Pid, code: i32) -> Result<(), Error> {
    let init = table.init_pid();
    if caller == init && table.contains(caller) {
        return Err(Error::ImmortalInit(caller));
    }
    let mut departed = table.remove(caller).ok_or(Error::NotFound(caller))?;
    departed.exit_code = code;
    table.reparent(caller, init);
    table.record_exit(departed);
    Ok(())
}

/// `setsid` on behalf of `caller`: the caller leads a new session and a new
/// group, both named after its pid.
///
/// # Errors
///
/// Function will error if `caller` is not live or already leads its session.
pub fn setsid(table: &mut ProcessTable, caller: Pid) -> Result<(), Error> {
    let result = new_session(table, caller);
    table.commit(caller, Syscall::Setsid, result.map(|()| 0));
    result
}

fn new_session(table: &mut ProcessTable, caller: Pid) -> Result<(), Error> {
    let process = table.get_mut(caller).ok_or(Error::NotFound(caller))?;
    if process.is_session_leader() {
        return Err(Error::AlreadyLeader(caller));
    }
    process.pgid = caller;
    process.sid = caller;
    Ok(())
}

/// `setpgid` on behalf of `caller`.
///
/// A `pid` of 0 stands for the caller, a `pgid` of 0 for the resolved
/// `pid`. When the caller asks to lead a group of its own the only
/// requirement is that it not lead its session. Otherwise the target must be
/// live and not lead its session, and the destination group must have a live
/// member in the target's session.
///
/// # Errors
///
/// Function will error if any of the above does not hold, or if `caller` is
/// not live.
pub fn setpgid(table: &mut ProcessTable, caller: Pid, pid: Pid, pgid: Pid) -> Result<(), Error> {
    let result = join_group(table, caller, pid, pgid);
    table.commit(caller, Syscall::Setpgid { pid, pgid }, result.map(|()| 0));
    result
}

fn join_group(table: &mut ProcessTable, caller: Pid, pid: Pid, pgid: Pid) -> Result<(), Error> {
    let actor = *table.lookup(caller)?;
    let pid = if pid == 0 { caller } else { pid };
    let pgid = if pgid == 0 { pid } else { pgid };

    if pid == caller && pgid == pid {
        if actor.is_session_leader() {
            return Err(Error::AlreadySessionLeader(caller));
        }
        if let Some(process) = table.get_mut(caller) {
            process.pgid = caller;
        }
        return Ok(());
    }

    let target = *table.get(pid).ok_or(Error::NoSuchProcess(pid))?;
    if target.is_session_leader() {
        return Err(Error::TargetIsSessionLeader(pid));
    }
    let group_sid = table.group_session(pgid).ok_or(Error::NoSuchGroup(pgid))?;
    if group_sid != target.sid {
        return Err(Error::CrossSessionMove {
            pid,
            sid: target.sid,
            pgid,
            group_sid,
        });
    }
    if let Some(process) = table.get_mut(pid) {
        process.pgid = pgid;
    }
    Ok(())
}

/// Perform `call` on behalf of `actor`.
///
/// # Errors
///
/// Function will error as the typed function for `call` does.
pub fn dispatch(table: &mut ProcessTable, actor: Pid, call: Syscall) -> Result<i64, Error> {
    match call {
        Syscall::Fork => fork(table, actor).map(i64::from),
        Syscall::Exit { code } => exit(table, actor, code).map(|()| 0),
        Syscall::Setsid => setsid(table, actor).map(|()| 0),
        Syscall::Setpgid { pid, pgid } => setpgid(table, actor, pid, pgid).map(|()| 0),
    }
}

/// Perform `call` on behalf of `actor` and return its result code: the new
/// pid for a successful `fork`, 0 for any other success, [`FAILURE`] on
/// error. The reason for a failure is [`ProcessTable::error_reason`].
pub fn invoke(table: &mut ProcessTable, actor: Pid, call: Syscall) -> i64 {
    dispatch(table, actor, call).unwrap_or(FAILURE)
}
