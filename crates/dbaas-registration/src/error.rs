//! Faults surfaced by a reconciliation attempt.

use std::fmt;
use std::path::PathBuf;

use kube::error::ErrorResponse;
use thiserror::Error;

/// Convenience alias for results produced by the control loop.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The step of a reconciliation attempt an error (or decision) originates from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Reading the triggering Deployment.
    FetchWorkload,
    /// Asking API discovery whether the DBaaSProvider type is served.
    CheckGate,
    /// Listing ClusterRoles to pick a garbage collection owner.
    ResolveOwner,
    /// Reading the bundled provider definition from disk.
    LoadDefinition,
    /// Creating or updating the registration.
    Upsert,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::FetchWorkload => "fetch-workload",
            Phase::CheckGate => "check-gate",
            Phase::ResolveOwner => "resolve-owner",
            Phase::LoadDefinition => "load-definition",
            Phase::Upsert => "upsert",
        };
        f.write_str(name)
    }
}

/// Describes everything that can make a reconciliation attempt fail.
///
/// "Deployment gone" and "type not served yet" are not errors; they are
/// reported through [`Outcome`](crate::reconciler::Outcome).
#[derive(Debug, Error)]
pub enum Error {
    /// The triggering Deployment could not be read.
    #[error("error fetching Deployment {namespace}/{name}: {source}")]
    FetchWorkload {
        /// Namespace of the Deployment
        namespace: String,
        /// Name of the Deployment
        name: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },
    /// API discovery failed for a reason other than the group/version being absent.
    #[error("error discovering {group_version} {kind}: {source}")]
    Discovery {
        /// The queried group/version
        group_version: String,
        /// The kind being looked for
        kind: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },
    /// ClusterRoles could not be listed.
    #[error("unable to list ClusterRoles to seek potential operand owners: {0}")]
    ListOwners(#[source] kube::Error),
    /// No ClusterRole carries the operator's ownership labels.
    #[error("could not find ClusterRole owned by {operator} to inherit operand")]
    OwnerNotFound {
        /// The operator package identity used in the label selector
        operator: String,
    },
    /// The definition file could not be read.
    #[error("unable to read provider definition {}: {source}", path.display())]
    ReadDefinition {
        /// Path of the definition file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The definition file is not valid JSON or YAML.
    #[error("unable to parse provider definition {}: {message}", path.display())]
    ParseDefinition {
        /// Path of the definition file
        path: PathBuf,
        /// Parser message
        message: String,
    },
    /// The registration could not be created or updated.
    #[error("error while creating or updating {name}: {source}")]
    Upsert {
        /// Name of the registration
        name: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },
    /// The attempt was cancelled or ran past its deadline.
    #[error("reconciliation cancelled during {phase}")]
    Cancelled {
        /// Phase that was running when cancellation was observed
        phase: Phase,
    },
}

impl Error {
    /// The phase this error was raised in.
    pub fn phase(&self) -> Phase {
        match self {
            Error::FetchWorkload { .. } => Phase::FetchWorkload,
            Error::Discovery { .. } => Phase::CheckGate,
            Error::ListOwners(_) | Error::OwnerNotFound { .. } => Phase::ResolveOwner,
            Error::ReadDefinition { .. } | Error::ParseDefinition { .. } => Phase::LoadDefinition,
            Error::Upsert { .. } => Phase::Upsert,
            Error::Cancelled { phase } => *phase,
        }
    }

    /// Returns true for errors signalling that an expected object is missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::OwnerNotFound { .. } => true,
            Error::FetchWorkload { source, .. }
            | Error::Discovery { source, .. }
            | Error::Upsert { source, .. } => is_api_code(source, 404),
            _ => false,
        }
    }
}

pub(crate) fn is_api_code(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(ErrorResponse { code: c, .. }) if *c == code)
}
