//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use pgroup_tree::permutation;
use serde::{Deserialize, Serialize};

use crate::driver;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The configuration parsed but is not usable
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration struct for this program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The syscall driver
    pub driver: driver::Config,
    /// The permutation experiment run over the driver's final snapshot
    #[serde(default)]
    pub permutation: permutation::Config,
}

impl Config {
    /// Determine whether the configuration is usable.
    ///
    /// # Errors
    ///
    /// Function will error if the driver configuration is invalid.
    pub fn validate(&self) -> Result<(), Error> {
        self.driver.valid().map_err(Error::Validation)
    }
}

/// Parse and validate a [`Config`] from YAML `contents`.
///
/// # Errors
///
/// Function will error if `contents` is not a valid YAML configuration or if
/// the resulting configuration fails [`Config::validate`].
pub fn get_config(contents: &str) -> Result<Config, Error> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate a [`Config`] from the YAML file at `path`.
///
/// # Errors
///
/// Function will error if the file cannot be read, or as [`get_config`].
pub fn from_path(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    get_config(&contents)
}
