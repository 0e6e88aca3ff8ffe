//! Generate, then permute.
//!
//! An experiment drives a freshly booted table to completion and runs the
//! permutation experiment over the final snapshot. The permutation stream is
//! seeded from the driver's stream once the run is over, so an experiment is
//! a pure function of its [`Config`] and the relabelings never replay the
//! driver's draws.

use pgroup_tree::permutation;
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use tracing::info;

use crate::{
    config::{self, Config},
    driver::{self, Driver},
};

/// Errors produced by [`run`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// See [`driver::Error`]
    #[error(transparent)]
    Driver(#[from] driver::Error),
    /// See [`config::Error`]
    #[error(transparent)]
    Config(#[from] config::Error),
}

/// Result of an experiment.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// What the driver produced
    pub driver: driver::Report,
    /// How the final snapshot fared under relabeling
    pub permutation: permutation::Report,
}

/// Run the experiment described by `config`.
///
/// # Errors
///
/// Function will error if `config` is invalid or if the driver run fails.
pub fn run(config: &Config) -> Result<Report, Error> {
    config.validate()?;

    let mut driver = Driver::new(&config.driver)?;
    let driver_report = driver.run()?;
    info!(
        live = driver_report.snapshot.len(),
        attempts = driver_report.attempts,
        "snapshot generated"
    );

    let mut rng = StdRng::from_seed(driver.next_seed());
    let permutation_report = permutation::run(
        &driver_report.snapshot,
        config.driver.init_pid,
        &config.permutation,
        &mut rng,
    );

    Ok(Report {
        driver: driver_report,
        permutation: permutation_report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(seed: u8, steps: u32) -> Config {
        let mut driver = driver::Config::new([seed; 32]);
        driver.steps = steps;
        Config {
            driver,
            permutation: permutation::Config {
                iterations: 5,
                ..permutation::Config::default()
            },
        }
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = config(0, 0);
        assert!(matches!(
            run(&config),
            Err(Error::Config(config::Error::Validation(_)))
        ));
    }

    #[test]
    fn experiments_replay() {
        let config = config(4, 50);
        let a = run(&config).unwrap();
        let b = run(&config).unwrap();
        assert_eq!(a.driver.snapshot, b.driver.snapshot);
        assert_eq!(a.permutation, b.permutation);
    }

    proptest! {
        #[test]
        fn generated_snapshots_survive_relabeling(seed: u8, steps in 1u32..80, shift: bool) {
            let mut config = config(seed, steps);
            config.permutation.shift = shift;
            let report = run(&config).unwrap();
            prop_assert_eq!(report.driver.completed, u64::from(steps));
            prop_assert_eq!(report.permutation.scores.len(), 5);
            prop_assert!(report.permutation.all_equivalent());
        }
    }
}
