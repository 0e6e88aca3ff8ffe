//! The pgroup tree library
//!
//! This library turns flat `(pid, pgid, sid, ppid)` process tables into typed
//! leadership trees and decides whether two such trees are structurally the
//! same. It knows nothing about how the tables were produced; see the
//! `pgroup` crate for the simulator that generates them.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]

pub mod graph;
pub mod oracle;
pub mod permutation;
pub mod reconstruct;
pub mod relabel;
pub mod snapshot;

pub use graph::Graph;
pub use oracle::Oracle;
pub use reconstruct::{Tree, reconstruct};
pub use snapshot::{PID_MAX, Pid, Row, Snapshot};
