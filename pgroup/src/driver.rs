//! The syscall driver.
//!
//! The driver fuzzes the syscall engine. Every step it asks its
//! [`Scheduler`] for an acting process, draws a syscall by weight,
//! synthesizes arguments and hands the call to the engine. A run ends once
//! `steps` calls have succeeded; failed and skipped attempts do not count,
//! but they are bounded by `max_attempts_per_step` so that a configuration
//! that can make no progress errors out instead of spinning.
//!
//! All randomness flows from one [`StdRng`] seeded from the configuration,
//! so a run is a pure function of its configuration and starting table.
//!
//! ## Stopping early
//!
//! [`Driver::step`] performs exactly one attempt. A caller that wants to
//! stop between steps simply stops calling it: the table is always left
//! with every completed transition applied and no partial one.

use pgroup_tree::{Pid, Snapshot};
use rand::{
    Rng, SeedableRng,
    distr::{
        Distribution,
        weighted::{self, WeightedIndex},
    },
    rngs::StdRng,
    seq::IndexedRandom,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    log::{Event, EventLog},
    scheduler::{Scheduler, Uniform},
    syscall::{self, Kind, Syscall},
    table::{self, Counters, Process, ProcessTable},
};

/// Errors produced by [`Driver`]
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum Error {
    /// See [`weighted::Error`]
    #[error(transparent)]
    Weights(#[from] weighted::Error),
    /// See [`table::Error`]
    #[error(transparent)]
    Table(#[from] table::Error),
    /// The scheduler selected no process
    #[error("scheduler selected no process")]
    EmptyTable,
    /// `fork` found every pid taken
    #[error("pid space exhausted")]
    PidSpaceExhausted,
    /// The attempt budget ran out before enough calls succeeded
    #[error("run stalled: {completed} calls succeeded in {attempts} attempts")]
    Stalled {
        /// Attempts made
        attempts: u64,
        /// Calls that succeeded
        completed: u64,
    },
}

fn default_steps() -> u32 {
    100
}

fn default_max_attempts_per_step() -> u32 {
    1000
}

fn default_init_pid() -> Pid {
    1
}

fn default_logging() -> bool {
    true
}

/// Defines the relative probability of each syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Weights {
    /// Relative weight of `fork`
    pub fork: u8,
    /// Relative weight of `setsid`
    pub setsid: u8,
    /// Relative weight of `setpgid`
    pub setpgid: u8,
    /// Relative weight of `exit`
    pub exit: u8,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            fork: 50,    // 50%
            setsid: 10,  // 10%
            setpgid: 30, // 30%
            exit: 10,    // 10%
        }
    }
}

impl Weights {
    // NOTE the ordering here is very important! It MUST match the order of
    // `Kind::ALL`, which is how `Driver::step` reads the sampled index.
    fn choices(self) -> [u16; 4] {
        [
            u16::from(self.fork),
            u16::from(self.setsid),
            u16::from(self.setpgid),
            u16::from(self.exit),
        ]
    }

    const fn is_zero(self) -> bool {
        self.fork == 0 && self.setsid == 0 && self.setpgid == 0 && self.exit == 0
    }
}

/// How `setpgid` arguments are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The caller joins a group picked among its session peers
    Simple,
    /// The caller, or one of its session peers, joins a peer's group or
    /// leads its own. Calls that would change nothing are skipped.
    #[default]
    Accurate,
    /// Any live pid joins any live group, regardless of session
    #[serde(rename = "default")]
    Unbiased,
}

/// Configuration of [`Driver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The seed for random operations against this run
    pub seed: [u8; 32],
    /// Number of syscalls that must succeed before the run ends
    #[serde(default = "default_steps")]
    pub steps: u32,
    /// Relative probability of each syscall
    #[serde(default)]
    pub weights: Weights,
    /// `setpgid` argument synthesis
    #[serde(default)]
    pub strategy: Strategy,
    /// Attempts allowed per counted step before the run is declared stalled
    #[serde(default = "default_max_attempts_per_step")]
    pub max_attempts_per_step: u32,
    /// Pid of the immortal init process
    #[serde(default = "default_init_pid")]
    pub init_pid: Pid,
    /// Whether the event log records
    #[serde(default = "default_logging")]
    pub logging: bool,
}

impl Config {
    /// Create a new [`Config`] with `seed` and every other field at its
    /// default.
    #[must_use]
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            steps: default_steps(),
            weights: Weights::default(),
            strategy: Strategy::default(),
            max_attempts_per_step: default_max_attempts_per_step(),
            init_pid: default_init_pid(),
            logging: default_logging(),
        }
    }

    /// Determine whether the passed configuration obeys validation criteria.
    ///
    /// # Errors
    ///
    /// Function will error if every weight is zero, or if `steps`,
    /// `max_attempts_per_step` or `init_pid` is zero.
    pub fn valid(&self) -> Result<(), String> {
        if self.weights.is_zero() {
            return Err("at least one syscall weight must be nonzero".to_string());
        }
        if self.steps == 0 {
            return Err("steps must be nonzero".to_string());
        }
        if self.max_attempts_per_step == 0 {
            return Err("max_attempts_per_step must be nonzero".to_string());
        }
        if self.init_pid == 0 {
            return Err("init_pid must be nonzero".to_string());
        }
        Ok(())
    }
}

/// Result of a single [`Driver::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The call succeeded and counts toward the budget
    Applied(Event),
    /// The engine refused the call
    Failed {
        /// The refused call, with the failure result code
        event: Event,
        /// Why it was refused
        error: syscall::Error,
    },
    /// No call was made: init drew `exit`, or the drawn `setpgid` would
    /// change nothing
    Skipped {
        /// The selected process
        actor: Pid,
        /// The drawn syscall
        kind: Kind,
    },
}

/// Result of a [`Driver::run`].
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// The table once the run completed
    pub snapshot: Snapshot,
    /// Every event recorded, if logging was on
    pub log: EventLog,
    /// Successful calls per kind, cumulative over the table's life
    pub counters: Counters,
    /// Attempts made during this run
    pub attempts: u64,
    /// Calls that succeeded during this run
    pub completed: u64,
    /// Calls the engine refused during this run
    pub failed: u64,
    /// Attempts skipped without a call during this run
    pub skipped: u64,
}

/// The syscall driver, see the module documentation.
#[derive(Debug)]
pub struct Driver<S = Uniform> {
    table: ProcessTable,
    scheduler: S,
    rng: StdRng,
    kinds: WeightedIndex<u16>,
    strategy: Strategy,
    steps: u32,
    max_attempts_per_step: u32,
}

impl Driver<Uniform> {
    /// Create a new [`Driver`] over a freshly booted table, scheduling
    /// uniformly at random.
    ///
    /// # Errors
    ///
    /// Function will error if every weight is zero or `init_pid` is invalid.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let table = ProcessTable::new(config.init_pid)?;
        Self::with_table(config, table, Uniform)
    }
}

impl<S> Driver<S>
where
    S: Scheduler,
{
    /// Create a new [`Driver`] over an existing table. The table's own init
    /// pid is used, `config.init_pid` is ignored.
    ///
    /// # Errors
    ///
    /// Function will error if every weight is zero.
    pub fn with_table(config: &Config, mut table: ProcessTable, scheduler: S) -> Result<Self, Error> {
        if config.logging {
            table.enable_logging();
        } else {
            table.disable_logging();
        }
        Ok(Self {
            table,
            scheduler,
            rng: StdRng::from_seed(config.seed),
            kinds: WeightedIndex::new(config.weights.choices())?,
            strategy: config.strategy,
            steps: config.steps,
            max_attempts_per_step: config.max_attempts_per_step,
        })
    }

    /// The table being driven.
    #[must_use]
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Give up the driver, keeping the table.
    #[must_use]
    pub fn into_table(self) -> ProcessTable {
        self.table
    }

    /// Draw a seed from the driver's stream, for seeding a downstream
    /// generator. The driver's later draws are unaffected by what that
    /// generator does with it.
    pub fn next_seed(&mut self) -> [u8; 32] {
        self.rng.random()
    }

    /// Make one attempt.
    ///
    /// # Errors
    ///
    /// Function will error if the scheduler selects nothing or if `fork`
    /// finds the pid space exhausted. Any other failure is an ordinary
    /// [`StepOutcome::Failed`].
    pub fn step(&mut self) -> Result<StepOutcome, Error> {
        let actor = self
            .scheduler
            .select(self.table.processes(), &mut self.rng)
            .ok_or(Error::EmptyTable)?;
        let kind = Kind::ALL[self.kinds.sample(&mut self.rng)];

        let call = match kind {
            Kind::Fork => Syscall::Fork,
            Kind::Setsid => Syscall::Setsid,
            Kind::Setpgid => {
                if let Some((pid, pgid)) = self.setpgid_args(actor) {
                    Syscall::Setpgid { pid, pgid }
                } else {
                    debug!(actor, "setpgid would change nothing, skipping");
                    return Ok(StepOutcome::Skipped { actor, kind });
                }
            }
            Kind::Exit => {
                if actor == self.table.init_pid() {
                    debug!(actor, "init may not exit, skipping");
                    return Ok(StepOutcome::Skipped { actor, kind });
                }
                Syscall::Exit { code: 0 }
            }
        };

        trace!(actor, %call, "attempting syscall");
        match syscall::dispatch(&mut self.table, actor, call) {
            Ok(retcode) => Ok(StepOutcome::Applied(Event {
                actor,
                call,
                retcode,
            })),
            Err(syscall::Error::RangeExhausted) => {
                warn!(actor, live = self.table.len(), "pid space exhausted");
                Err(Error::PidSpaceExhausted)
            }
            Err(error) => {
                debug!(actor, %call, %error, "syscall failed");
                Ok(StepOutcome::Failed {
                    event: Event {
                        actor,
                        call,
                        retcode: syscall::FAILURE,
                    },
                    error,
                })
            }
        }
    }

    /// Step until `steps` calls have succeeded.
    ///
    /// # Errors
    ///
    /// Function will error if a step errors or if `steps *
    /// max_attempts_per_step` attempts pass without enough successes.
    pub fn run(&mut self) -> Result<Report, Error> {
        let target = u64::from(self.steps);
        let budget = target.saturating_mul(u64::from(self.max_attempts_per_step));

        let mut attempts: u64 = 0;
        let mut completed: u64 = 0;
        let mut failed: u64 = 0;
        let mut skipped: u64 = 0;
        while completed < target {
            if attempts >= budget {
                warn!(attempts, completed, "run stalled");
                return Err(Error::Stalled {
                    attempts,
                    completed,
                });
            }
            attempts += 1;
            match self.step()? {
                StepOutcome::Applied(_) => completed += 1,
                StepOutcome::Failed { .. } => failed += 1,
                StepOutcome::Skipped { .. } => skipped += 1,
            }
        }

        let counters = *self.table.counters();
        info!(
            attempts,
            failed,
            skipped,
            live = self.table.len(),
            %counters,
            "run complete"
        );
        Ok(Report {
            snapshot: self.table.snapshot(),
            log: self.table.log().clone(),
            counters,
            attempts,
            completed,
            failed,
            skipped,
        })
    }

    /// Synthesize `(pid, pgid)` for a `setpgid` by `actor`, or `None` if the
    /// call should be skipped.
    fn setpgid_args(&mut self, actor: Pid) -> Option<(Pid, Pid)> {
        let Some(process) = self.table.get(actor).copied() else {
            // The engine will refuse a dead actor whatever the arguments.
            return Some((0, 0));
        };
        let peers: Vec<Process> = self.table.session_members(process.sid).copied().collect();

        match self.strategy {
            Strategy::Simple => {
                let pgid = peers.choose(&mut self.rng)?.pgid;
                Some((0, pgid))
            }
            Strategy::Accurate => {
                let peer = peers.choose(&mut self.rng)?.pid;
                let pid = if self.rng.random_bool(0.5) { peer } else { 0 };
                let group = peers.choose(&mut self.rng)?.pgid;
                let pgid = if self.rng.random_bool(0.5) { group } else { pid };

                let target = if pid == 0 { actor } else { pid };
                let destination = if pgid == 0 { target } else { pgid };
                if target == actor && destination == actor && process.is_group_leader() {
                    return None;
                }
                Some((pid, pgid))
            }
            Strategy::Unbiased => {
                let live = self.table.processes();
                let pid = live.choose(&mut self.rng)?.pid;
                let pgid = live.choose(&mut self.rng)?.pgid;
                Some((pid, pgid))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RoundRobin;
    use proptest::prelude::{Just, prop_assert, prop_assert_eq, prop_oneof, proptest};
    use rand::RngCore;

    fn config(seed: u64) -> Config {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&seed.to_le_bytes());
        Config::new(bytes)
    }

    #[test]
    fn defaults() {
        let config = config(0);
        assert_eq!(config.steps, 100);
        assert_eq!(config.weights.choices(), [50, 10, 30, 10]);
        assert_eq!(config.strategy, Strategy::Accurate);
        assert_eq!(config.max_attempts_per_step, 1000);
        assert_eq!(config.init_pid, 1);
        assert!(config.logging);
        assert!(config.valid().is_ok());
    }

    #[test]
    fn validation() {
        let mut config = config(0);
        config.steps = 0;
        assert!(config.valid().is_err());
        let mut config = self::config(0);
        config.init_pid = 0;
        assert!(config.valid().is_err());
        let mut config = self::config(0);
        config.max_attempts_per_step = 0;
        assert!(config.valid().is_err());
        let mut config = self::config(0);
        config.weights = Weights {
            fork: 0,
            setsid: 0,
            setpgid: 0,
            exit: 0,
        };
        assert!(config.valid().is_err());
    }

    #[test]
    fn zero_weights_are_rejected() {
        let mut config = config(0);
        config.weights = Weights {
            fork: 0,
            setsid: 0,
            setpgid: 0,
            exit: 0,
        };
        assert!(matches!(Driver::new(&config), Err(Error::Weights(_))));
    }

    #[test]
    fn run_counts_successes_only() {
        let mut driver = Driver::new(&config(1)).unwrap();
        let report = driver.run().unwrap();
        assert_eq!(report.completed, 100);
        assert_eq!(report.counters.total(), 100);
        assert_eq!(report.attempts, report.completed + report.failed + report.skipped);
        assert_eq!(
            u64::try_from(report.log.len()).unwrap(),
            report.completed + report.failed
        );
        assert_eq!(report.log.successes().count(), 100);
        assert_eq!(report.snapshot, driver.table().snapshot());
    }

    #[test]
    fn runs_are_reproducible() {
        let a = Driver::new(&config(42)).unwrap().run().unwrap();
        let b = Driver::new(&config(42)).unwrap().run().unwrap();
        assert_eq!(a.snapshot, b.snapshot);
        assert_eq!(a.log, b.log);
        assert_eq!(a.counters, b.counters);
    }

    #[test]
    fn next_seed_continues_the_stream() {
        let config = config(5);
        let mut driver = Driver::new(&config).unwrap();
        driver.run().unwrap();
        let seed = driver.next_seed();
        assert_ne!(seed, config.seed);
        let replayed: [u8; 32] = StdRng::from_seed(config.seed).random();
        assert_ne!(seed, replayed);
        assert_ne!(seed, driver.next_seed());
    }

    #[test]
    fn logging_off_keeps_counting() {
        let mut config = config(3);
        config.logging = false;
        let report = Driver::new(&config).unwrap().run().unwrap();
        assert!(report.log.is_empty());
        assert_eq!(report.counters.total(), 100);
    }

    #[test]
    fn exit_only_stalls() {
        // Init alone may never exit, so nothing ever succeeds.
        let mut config = config(0);
        config.steps = 2;
        config.max_attempts_per_step = 10;
        config.weights = Weights {
            fork: 0,
            setsid: 0,
            setpgid: 0,
            exit: 1,
        };
        let mut driver = Driver::new(&config).unwrap();
        assert_eq!(
            driver.step().unwrap(),
            StepOutcome::Skipped {
                actor: 1,
                kind: Kind::Exit
            }
        );
        assert!(matches!(
            driver.run(),
            Err(Error::Stalled {
                attempts: 20,
                completed: 0
            })
        ));
        assert_eq!(driver.table().len(), 1);
    }

    #[test]
    fn empty_selection_stops_the_run() {
        let scheduler = |_: &[Process], _: &mut dyn RngCore| -> Option<Pid> { None };
        let table = ProcessTable::new(1).unwrap();
        let mut driver = Driver::with_table(&config(0), table, scheduler).unwrap();
        assert!(matches!(driver.run(), Err(Error::EmptyTable)));
    }

    #[test]
    fn exhaustion_is_fatal() {
        let rows = (1..pgroup_tree::PID_MAX).map(|pid| (pid, 1, 1, u32::from(pid != 1)));
        let snapshot = Snapshot::import(rows).unwrap();
        let table = ProcessTable::from_snapshot(&snapshot, 1).unwrap();
        let mut config = config(0);
        config.weights = Weights {
            fork: 1,
            setsid: 0,
            setpgid: 0,
            exit: 0,
        };
        let mut driver = Driver::with_table(&config, table, Uniform).unwrap();
        assert!(matches!(driver.step(), Err(Error::PidSpaceExhausted)));
    }

    #[test]
    fn stepping_by_hand() {
        let mut config = config(9);
        config.weights = Weights {
            fork: 1,
            setsid: 0,
            setpgid: 0,
            exit: 0,
        };
        let table = ProcessTable::new(1).unwrap();
        let mut driver = Driver::with_table(&config, table, RoundRobin::default()).unwrap();
        for expected in 2i64..6 {
            match driver.step().unwrap() {
                StepOutcome::Applied(event) => {
                    assert_eq!(event.call, Syscall::Fork);
                    assert_eq!(event.retcode, expected);
                }
                outcome => panic!("unexpected outcome {outcome:?}"),
            }
        }
        // The cursor always lands on the newest process.
        let parents: Vec<Pid> = driver.table().processes().iter().map(|p| p.ppid).collect();
        assert_eq!(parents, vec![0, 1, 2, 3, 4]);
    }

    /// Two sessions: 1 holds groups 1 and 2, 5 holds groups 5 and 7.
    fn two_sessions() -> ProcessTable {
        let snapshot = Snapshot::import([
            (1, 1, 1, 0),
            (2, 2, 1, 1),
            (3, 2, 1, 2),
            (4, 1, 1, 1),
            (5, 5, 5, 1),
            (6, 5, 5, 5),
            (7, 7, 5, 5),
        ])
        .unwrap();
        ProcessTable::from_snapshot(&snapshot, 1).unwrap()
    }

    /// Step a setpgid-only driver, pairing each outcome with the live
    /// processes as they were before the step.
    fn observe(seed: u64, strategy: Strategy) -> Vec<(Vec<Process>, StepOutcome)> {
        let mut config = config(seed);
        config.strategy = strategy;
        config.weights = Weights {
            fork: 0,
            setsid: 0,
            setpgid: 1,
            exit: 0,
        };
        let mut driver = Driver::with_table(&config, two_sessions(), Uniform).unwrap();
        (0..200)
            .map(|_| {
                let before = driver.table().processes().to_vec();
                (before, driver.step().unwrap())
            })
            .collect()
    }

    fn setpgid_call(outcome: &StepOutcome) -> Option<(Pid, Pid, Pid)> {
        let event = match outcome {
            StepOutcome::Applied(event) | StepOutcome::Failed { event, .. } => event,
            StepOutcome::Skipped { .. } => return None,
        };
        match event.call {
            Syscall::Setpgid { pid, pgid } => Some((event.actor, pid, pgid)),
            call => panic!("unexpected call {call}"),
        }
    }

    fn crosses_sessions(outcome: &StepOutcome) -> bool {
        matches!(
            outcome,
            StepOutcome::Failed {
                error: syscall::Error::CrossSessionMove { .. },
                ..
            }
        )
    }

    fn find(live: &[Process], pid: Pid) -> Process {
        *live.iter().find(|p| p.pid == pid).unwrap()
    }

    #[test]
    fn simple_joins_a_peer_group() {
        for (before, outcome) in observe(11, Strategy::Simple) {
            let (actor, pid, pgid) = setpgid_call(&outcome).expect("simple never skips");
            let sid = find(&before, actor).sid;
            assert_eq!(pid, 0);
            assert!(before.iter().any(|p| p.sid == sid && p.pgid == pgid));
            assert!(!crosses_sessions(&outcome));
        }
    }

    #[test]
    fn accurate_stays_in_session_and_skips_no_ops() {
        let mut skipped = 0;
        for (before, outcome) in observe(12, Strategy::Accurate) {
            if let StepOutcome::Skipped { actor, kind } = outcome {
                assert_eq!(kind, Kind::Setpgid);
                assert!(find(&before, actor).is_group_leader());
                skipped += 1;
                continue;
            }
            let (actor, pid, pgid) = setpgid_call(&outcome).unwrap();
            let caller = find(&before, actor);
            let peers: Vec<&Process> = before.iter().filter(|p| p.sid == caller.sid).collect();
            assert!(pid == 0 || peers.iter().any(|p| p.pid == pid));
            assert!(pgid == pid || peers.iter().any(|p| p.pgid == pgid));

            let target = if pid == 0 { actor } else { pid };
            let destination = if pgid == 0 { target } else { pgid };
            assert!(!(target == actor && destination == actor && caller.is_group_leader()));
            assert!(!crosses_sessions(&outcome));
        }
        assert!(skipped > 0);
    }

    #[test]
    fn unbiased_ignores_sessions() {
        let mut crossed = 0;
        for (before, outcome) in observe(13, Strategy::Unbiased) {
            let (_, pid, pgid) = setpgid_call(&outcome).expect("unbiased never skips");
            assert!(before.iter().any(|p| p.pid == pid));
            assert!(before.iter().any(|p| p.pgid == pgid));
            if crosses_sessions(&outcome) {
                crossed += 1;
            }
        }
        assert!(crossed > 0);
    }

    fn strategy() -> impl proptest::strategy::Strategy<Value = Strategy> {
        prop_oneof![
            Just(Strategy::Simple),
            Just(Strategy::Accurate),
            Just(Strategy::Unbiased),
        ]
    }

    proptest! {
        #[test]
        fn runs_complete_in_well_formed_states(seed: u64, strategy in strategy(), steps in 1u32..64) {
            let mut config = config(seed);
            config.strategy = strategy;
            config.steps = steps;
            let mut driver = Driver::new(&config).unwrap();
            let report = driver.run().unwrap();
            prop_assert_eq!(report.completed, u64::from(steps));
            prop_assert_eq!(report.counters.total(), u64::from(steps));

            let table = driver.table();
            prop_assert!(table.contains(1));
            for process in table.processes() {
                if process.is_session_leader() {
                    prop_assert!(process.is_group_leader());
                }
                prop_assert!(process.ppid == 0 || table.contains(process.ppid));
            }
        }
    }
}
