//! Finds the ClusterRole that owns the registration for garbage collection.

use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::OwnerCandidate;

/// Label OLM puts on objects it creates for an operator's package version.
pub const OLM_OWNER_LABEL: &str = "olm.owner";
/// Label OLM uses to record the kind of the owning object.
pub const OLM_OWNER_KIND_LABEL: &str = "olm.owner.kind";
/// Value of [`OLM_OWNER_KIND_LABEL`] for objects owned by a package version.
pub const OLM_OWNER_KIND: &str = "ClusterServiceVersion";

/// The label selector matching objects installed for `operator_name`.
pub fn owner_label_selector(operator_name: &str) -> String {
    format!(
        "{}={},{}={}",
        OLM_OWNER_LABEL, operator_name, OLM_OWNER_KIND_LABEL, OLM_OWNER_KIND
    )
}

/// Looks up ClusterRoles installed with the running operator's package.
#[derive(Clone)]
pub struct OwnerResolver {
    api: Api<ClusterRole>,
    operator_name: String,
}

impl OwnerResolver {
    /// Create a resolver for the package identity `operator_name`.
    pub fn new(client: Client, operator_name: &str) -> Self {
        OwnerResolver {
            api: Api::all(client),
            operator_name: operator_name.to_string(),
        }
    }

    /// Picks the owner for the registration.
    ///
    /// Fails with [`Error::OwnerNotFound`] when no referenceable ClusterRole
    /// carries the operator's labels. When several do, the one with the
    /// smallest name wins so repeated calls agree.
    pub async fn find_owner(&self) -> Result<OwnerCandidate> {
        let params = ListParams::default().labels(&owner_label_selector(&self.operator_name));
        let roles = self.api.list(&params).await.map_err(Error::ListOwners)?;
        debug!(
            operator = %self.operator_name,
            count = roles.items.len(),
            "Listed potential owner ClusterRoles"
        );

        roles
            .items
            .iter()
            .filter_map(OwnerCandidate::from_cluster_role)
            .min_by(|a, b| a.name.cmp(&b.name))
            .ok_or_else(|| Error::OwnerNotFound {
                operator: self.operator_name.clone(),
            })
    }
}
