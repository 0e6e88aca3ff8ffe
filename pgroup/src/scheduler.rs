//! Schedulers.
//!
//! A [`Scheduler`] picks the process that acts in the next step. The engine
//! keeps init alive, so a scheduler is never handed an empty slice by the
//! driver; returning `None` anyway stops the run.

use pgroup_tree::Pid;
use rand::{RngCore, seq::IndexedRandom};

use crate::table::Process;

/// Choice of the acting process.
pub trait Scheduler {
    /// Select the pid of the process to act next among `live`.
    fn select(&mut self, live: &[Process], rng: &mut dyn RngCore) -> Option<Pid>;
}

/// Uniform random choice over the live processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl Scheduler for Uniform {
    fn select(&mut self, live: &[Process], rng: &mut dyn RngCore) -> Option<Pid> {
        live.choose(rng).map(|process| process.pid)
    }
}

/// Cycles over the live processes in table order.
///
/// The cursor is a position, not a pid: when processes come and go the cycle
/// carries on from the same slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin {
    next: usize,
}

impl Scheduler for RoundRobin {
    fn select(&mut self, live: &[Process], _rng: &mut dyn RngCore) -> Option<Pid> {
        if live.is_empty() {
            return None;
        }
        let index = self.next % live.len();
        self.next = index + 1;
        Some(live[index].pid)
    }
}

impl<F> Scheduler for F
where
    F: FnMut(&[Process], &mut dyn RngCore) -> Option<Pid>,
{
    fn select(&mut self, live: &[Process], rng: &mut dyn RngCore) -> Option<Pid> {
        self(live, rng)
    }
}
