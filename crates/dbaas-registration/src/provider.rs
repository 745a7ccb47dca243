//! The `DBaaSProvider` custom resource and the desired shape of the RDS
//! registration.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};

use crate::definition::ResourceDefinition;

/// Name of the cluster-scoped registration owned by this operator.
pub const PROVIDER_CR_NAME: &str = "rds-registration";

/// Label key marking which operator the registration relates to.
pub const RELATED_TO_LABEL_NAME: &str = "related-to";
/// Value of [`RELATED_TO_LABEL_NAME`].
pub const RELATED_TO_LABEL_VALUE: &str = "dbaas-operator";
/// Label key describing the kind of registration.
pub const TYPE_LABEL_NAME: &str = "type";
/// Value of [`TYPE_LABEL_NAME`].
pub const TYPE_LABEL_VALUE: &str = "dbaas-provider-registration";

const CLUSTER_ROLE_API_VERSION: &str = "rbac.authorization.k8s.io/v1";
const CLUSTER_ROLE_KIND: &str = "ClusterRole";

/// A DBaaS provider registration (`dbaas.redhat.com/v1beta1`, cluster scoped).
///
/// Its `spec` is carried as an opaque document; this operator only copies it
/// from the bundled definition.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DBaaSProvider {
    /// Always `dbaas.redhat.com/v1beta1` once built by [`desired_provider`].
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    /// Always `DBaaSProvider` once built by [`desired_provider`].
    #[serde(default)]
    pub kind: String,
    /// Standard object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// The provider description.
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl k8s_openapi::Resource for DBaaSProvider {
    const API_VERSION: &'static str = "dbaas.redhat.com/v1beta1";
    const GROUP: &'static str = "dbaas.redhat.com";
    const KIND: &'static str = "DBaaSProvider";
    const VERSION: &'static str = "v1beta1";
    const URL_PATH_SEGMENT: &'static str = "dbaasproviders";
    type Scope = k8s_openapi::ClusterResourceScope;
}

impl k8s_openapi::Metadata for DBaaSProvider {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// The ClusterRole picked as garbage collection owner of the registration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OwnerCandidate {
    /// ClusterRole name
    pub name: String,
    /// ClusterRole UID
    pub uid: String,
}

impl OwnerCandidate {
    /// Builds a candidate from a listed ClusterRole. Roles without a name or
    /// UID cannot be referenced and yield `None`.
    pub fn from_cluster_role(role: &ClusterRole) -> Option<Self> {
        Some(OwnerCandidate {
            name: role.metadata.name.clone()?,
            uid: role.metadata.uid.clone()?,
        })
    }

    /// The owner reference recorded on the registration.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: CLUSTER_ROLE_API_VERSION.to_string(),
            kind: CLUSTER_ROLE_KIND.to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(false),
        }
    }
}

/// The fixed label set placed on the registration.
pub fn registration_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        RELATED_TO_LABEL_NAME.to_string(),
        RELATED_TO_LABEL_VALUE.to_string(),
    );
    labels.insert(TYPE_LABEL_NAME.to_string(), TYPE_LABEL_VALUE.to_string());
    labels
}

/// Computes the registration as it should be stored.
///
/// Starts from `existing` (so server-populated metadata such as the
/// resourceVersion survives) or from an empty object named
/// [`PROVIDER_CR_NAME`], then overwrites owner references, labels and spec.
/// The result depends only on the inputs, so applying it to its own output
/// yields the same object.
pub fn desired_provider(
    existing: Option<&DBaaSProvider>,
    definition: &ResourceDefinition,
    owner: &OwnerCandidate,
) -> DBaaSProvider {
    use k8s_openapi::Resource;

    let mut provider = existing.cloned().unwrap_or_else(|| DBaaSProvider {
        metadata: ObjectMeta {
            name: Some(PROVIDER_CR_NAME.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });
    provider.api_version = DBaaSProvider::API_VERSION.to_string();
    provider.kind = DBaaSProvider::KIND.to_string();
    provider.metadata.owner_references = Some(vec![owner.owner_reference()]);
    provider.metadata.labels = Some(registration_labels());
    provider.spec = definition.spec.clone();
    provider
}
