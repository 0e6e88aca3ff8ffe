//! The pgroup process group simulator
//!
//! This library simulates the logical state machine behind POSIX `fork`,
//! `exit`, `setsid` and `setpgid`: who is in which process group, which
//! session, and who parented whom. No real system call is ever made. A
//! seeded [`driver::Driver`] fuzzes the engine into arbitrary reachable
//! states, whose snapshots are handed off to `pgroup-tree` for
//! reconstruction and equivalence checking.

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

pub mod config;
pub mod driver;
pub mod experiment;
pub mod log;
pub mod scheduler;
pub mod syscall;
pub mod table;

pub use pgroup_tree::{PID_MAX, Pid, Snapshot};
pub use table::{Process, ProcessTable};
