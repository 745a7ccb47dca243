//! A crate for registering the RDS DBaaS operator with the DBaaS operator.
//!
//! Once the operator's own Deployment shows up and the `DBaaSProvider` API is
//! served, the [`Controller`] creates (or keeps up to date) the cluster scoped
//! `rds-registration` DBaaSProvider, owned by one of the ClusterRoles OLM
//! installed with the operator.
//!
//! # Example
//! ```rust,no_run
//! use dbaas_registration::{config::Config, Controller};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = kube::Client::try_default().await.unwrap();
//!     let config = Config::new("openshift-dbaas-operator", "rds-dbaas-operator.v0.1.0");
//!
//!     Controller::new(client, config).run(CancellationToken::new()).await;
//! }
//! ```

#![warn(missing_docs)]

pub mod admission;
pub mod backoff;
pub mod config;
pub mod context;
mod controller;
pub mod definition;
pub mod discovery;
pub mod error;
pub mod event;
pub mod owner;
pub mod provider;
pub mod queue;
pub mod reconciler;

#[cfg(test)]
mod test_utils;

pub use self::controller::{watch_loop, Controller};

#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use provider::DBaaSProvider;
#[doc(inline)]
pub use reconciler::{Outcome, Reconciler};
