//! Flat process tables.
//!
//! A [`Snapshot`] is a point-in-time export of a process table: one
//! `(pid, pgid, sid, ppid)` row per live process and nothing else. Snapshots
//! are decoupled from whatever produced them and are read-only once built.
//! Text, CSV or JSON encodings are left to the caller; this module only moves
//! rows in and out.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process, process group and session identifier.
pub type Pid = u32;

/// Size of the pid namespace. Every identifier lies in `[0, PID_MAX)`.
pub const PID_MAX: Pid = 65_535;

/// Errors produced by [`Snapshot::import`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An identifier in a row fell outside of the pid namespace
    #[error("identifier {value} in row for pid {pid} is outside of [0, {PID_MAX})")]
    OutOfRange {
        /// The pid of the offending row
        pid: Pid,
        /// The offending value
        value: Pid,
    },
}

/// A single process as seen in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Row {
    /// Process id
    pub pid: Pid,
    /// Process group id
    pub pgid: Pid,
    /// Session id
    pub sid: Pid,
    /// Parent process id
    pub ppid: Pid,
}

impl Row {
    /// Create a new [`Row`]
    #[must_use]
    pub const fn new(pid: Pid, pgid: Pid, sid: Pid, ppid: Pid) -> Self {
        Self {
            pid,
            pgid,
            sid,
            ppid,
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

    /// All four identifiers of the row, `pid` first.
    #[must_use]
    pub const fn ids(&self) -> [Pid; 4] {
        [self.pid, self.pgid, self.sid, self.ppid]
    }
}

impl From<(Pid, Pid, Pid, Pid)> for Row {
    fn from((pid, pgid, sid, ppid): (Pid, Pid, Pid, Pid)) -> Self {
        Self::new(pid, pgid, sid, ppid)
    }
}

impl From<Row> for (Pid, Pid, Pid, Pid) {
    fn from(row: Row) -> Self {
        (row.pid, row.pgid, row.sid, row.ppid)
    }
}

/// An immutable, ordered list of [`Row`].
///
/// Row order is whatever order the producer exported in. Consumers that need
/// a canonical order, such as the reconstructor, impose their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    rows: Vec<Row>,
}

impl Snapshot {
    /// Build a [`Snapshot`] from raw `(pid, pgid, sid, ppid)` tuples.
    ///
    /// No cross-row validation is done: duplicate pids, dangling group or
    /// session references and the like are all accepted, as reconstruction
    /// must cope with them anyway.
    ///
    /// # Errors
    ///
    /// Function will error if any identifier lies outside of `[0, PID_MAX)`.
    pub fn import<I>(rows: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (Pid, Pid, Pid, Pid)>,
    {
        let rows = rows
            .into_iter()
            .map(Row::from)
            .map(|row| match row.ids().into_iter().find(|id| *id >= PID_MAX) {
                Some(value) => Err(Error::OutOfRange {
                    pid: row.pid,
                    value,
                }),
                None => Ok(row),
            })
            .collect::<Result<Vec<Row>, Error>>()?;
        Ok(Self { rows })
    }

    /// Export the rows of this snapshot as raw tuples, in snapshot order.
    #[must_use]
    pub fn export(&self) -> Vec<(Pid, Pid, Pid, Pid)> {
        self.rows.iter().copied().map(Into::into).collect()
    }

    /// The rows of this snapshot.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the snapshot holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row with the given `pid`, if any.
    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Row> {
        self.rows.iter().find(|row| row.pid == pid)
    }
}

impl From<Vec<Row>> for Snapshot {
    fn from(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

impl FromIterator<Row> for Snapshot {
    fn from_iter<T: IntoIterator<Item = Row>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Snapshot {
    /// Formats [`Snapshot`] as a tab separated `ps`-like listing.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PID\tPGID\tSID\tPPID")?;
        for row in &self.rows {
            writeln!(f, "{}\t{}\t{}\t{}", row.pid, row.pgid, row.sid, row.ppid)?;
        }
        Ok(())
    }
}
