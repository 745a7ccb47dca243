//! Configuration for the registration controller
//!
//! Build a [`Config`] with [`Config::new`] or, with the "cli" feature turned
//! on, from flags and environment with [`Config::new_from_flags`].

use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;
use thiserror::Error;

use crate::definition::definition_path;

/// Environment variable holding the namespace the operator is installed in.
pub const INSTALL_NAMESPACE_ENV: &str = "INSTALL_NAMESPACE";
/// Environment variable OLM sets to the operator's package identity.
pub const OPERATOR_NAME_ENV: &str = "OPERATOR_CONDITION_NAME";

const DEFAULT_DEFINITION_DIR: &str = "/manifests";
const DEFAULT_TYPE_RETRY_MIN_SECS: u64 = 30;
const DEFAULT_TYPE_RETRY_MAX_SECS: u64 = 30 * 60;
const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_CONCURRENT: usize = 1;

/// Startup configuration faults. Any of these stops the process.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A required value was not provided.
    #[error("{0} must be set")]
    Missing(&'static str),
    /// The retry delay bounds are unusable.
    #[error("invalid retry bounds: minimum {min:?} must be positive and not above maximum {max:?}")]
    InvalidRetryBounds {
        /// Configured minimum delay
        min: Duration,
        /// Configured maximum delay
        max: Duration,
    },
    /// At least one reconciliation must be allowed to run.
    #[error("max concurrent reconciliations must be at least 1")]
    InvalidConcurrency,
    /// A reconciliation attempt must be given some time to run.
    #[error("reconcile timeout must be positive")]
    InvalidReconcileTimeout,
}

/// Immutable settings read once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Namespace the operator's own Deployment lives in
    pub install_namespace: String,
    /// The operator's package identity, as found in `olm.owner` labels
    pub operator_name: String,
    /// Directory containing the bundled `rds_registration.yaml`
    pub definition_dir: PathBuf,
    /// First delay while waiting for the DBaaSProvider API
    pub type_retry_min: Duration,
    /// Largest delay while waiting for the DBaaSProvider API
    pub type_retry_max: Duration,
    /// Deadline for a single reconciliation attempt
    pub reconcile_timeout: Duration,
    /// How many different objects may reconcile at once
    pub max_concurrent: usize,
}

impl Config {
    /// Returns a Config for the given identity with every other value
    /// defaulted.
    pub fn new(install_namespace: &str, operator_name: &str) -> Self {
        Config {
            install_namespace: install_namespace.to_string(),
            operator_name: operator_name.to_string(),
            definition_dir: PathBuf::from(DEFAULT_DEFINITION_DIR),
            type_retry_min: Duration::from_secs(DEFAULT_TYPE_RETRY_MIN_SECS),
            type_retry_max: Duration::from_secs(DEFAULT_TYPE_RETRY_MAX_SECS),
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    /// Full path of the bundled definition file.
    pub fn definition_path(&self) -> PathBuf {
        definition_path(&self.definition_dir)
    }

    /// Parses all command line flags and environment variables. The version
    /// of your application should be passed to set the proper version for the CLI
    #[cfg(feature = "cli")]
    pub fn new_from_flags(version: &str) -> Result<Self, ConfigError> {
        let app = Opts::clap().version(version);
        let opts = Opts::from_clap(&app.get_matches());
        Config::try_from(opts)
    }
}

impl TryFrom<Opts> for Config {
    type Error = ConfigError;

    fn try_from(opts: Opts) -> Result<Self, Self::Error> {
        let install_namespace = required(opts.install_namespace, INSTALL_NAMESPACE_ENV)?;
        let operator_name = required(opts.operator_name, OPERATOR_NAME_ENV)?;

        let type_retry_min = Duration::from_secs(opts.type_retry_min_secs);
        let type_retry_max = Duration::from_secs(opts.type_retry_max_secs);
        if type_retry_min == Duration::from_secs(0) || type_retry_min > type_retry_max {
            return Err(ConfigError::InvalidRetryBounds {
                min: type_retry_min,
                max: type_retry_max,
            });
        }
        if opts.max_concurrent == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if opts.reconcile_timeout_secs == 0 {
            return Err(ConfigError::InvalidReconcileTimeout);
        }

        Ok(Config {
            install_namespace,
            operator_name,
            definition_dir: opts.definition_dir,
            type_retry_min,
            type_retry_max,
            reconcile_timeout: Duration::from_secs(opts.reconcile_timeout_secs),
            max_concurrent: opts.max_concurrent,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// CLI options for the registration controller
///
/// These can be parsed from args using `Opts::from_args()`
#[derive(Clone, Debug)]
#[cfg_attr(feature = "cli", derive(StructOpt))]
#[cfg_attr(
    feature = "cli",
    structopt(
        name = "rds-dbaas-operator",
        about = "Registers the RDS DBaaS provider once the DBaaSProvider API is available"
    )
)]
pub struct Opts {
    /// Namespace the operator is installed in
    #[cfg_attr(feature = "cli", structopt(long = "install-namespace", env = "INSTALL_NAMESPACE"))]
    pub install_namespace: Option<String>,

    /// Package identity of the running operator
    #[cfg_attr(feature = "cli", structopt(long = "operator-name", env = "OPERATOR_CONDITION_NAME"))]
    pub operator_name: Option<String>,

    /// Directory holding rds_registration.yaml
    #[cfg_attr(
        feature = "cli",
        structopt(
            long = "definition-dir",
            default_value = "/manifests",
            env = "DBAAS_PROVIDER_DEFINITION_DIR"
        )
    )]
    pub definition_dir: PathBuf,

    /// Initial delay in seconds while the DBaaSProvider API is not served
    #[cfg_attr(feature = "cli", structopt(long = "type-retry-min-secs", default_value = "30"))]
    pub type_retry_min_secs: u64,

    /// Maximum delay in seconds while the DBaaSProvider API is not served
    #[cfg_attr(feature = "cli", structopt(long = "type-retry-max-secs", default_value = "1800"))]
    pub type_retry_max_secs: u64,

    /// Deadline in seconds for one reconciliation attempt
    #[cfg_attr(feature = "cli", structopt(long = "reconcile-timeout-secs", default_value = "60"))]
    pub reconcile_timeout_secs: u64,

    /// Number of objects that may reconcile concurrently
    #[cfg_attr(feature = "cli", structopt(long = "max-concurrent", default_value = "1"))]
    pub max_concurrent: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Opts {
            install_namespace: None,
            operator_name: None,
            definition_dir: PathBuf::from(DEFAULT_DEFINITION_DIR),
            type_retry_min_secs: DEFAULT_TYPE_RETRY_MIN_SECS,
            type_retry_max_secs: DEFAULT_TYPE_RETRY_MAX_SECS,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}
