//! Gate deferring work until an API type is served by the cluster.

use kube::Client;
use tracing::debug;

use crate::error::{is_api_code, Error, Result};

/// Checks API discovery for a group/version/kind.
#[derive(Clone)]
pub struct TypeAvailabilityGate {
    client: Client,
}

impl TypeAvailabilityGate {
    /// Create a gate backed by `client`.
    pub fn new(client: Client) -> Self {
        TypeAvailabilityGate { client }
    }

    /// Returns whether `kind` is served under `group_version`.
    ///
    /// A group/version unknown to discovery is reported as `Ok(false)`; the
    /// type may still be installed later. Results are never cached.
    pub async fn is_available(&self, group_version: &str, kind: &str) -> Result<bool> {
        let resources = match self.client.list_api_group_resources(group_version).await {
            Ok(resources) => resources,
            Err(e) if is_api_code(&e, 404) => {
                debug!(group_version, kind, "API group/version not served");
                return Ok(false);
            }
            Err(source) => {
                return Err(Error::Discovery {
                    group_version: group_version.to_string(),
                    kind: kind.to_string(),
                    source,
                })
            }
        };

        Ok(resources.resources.iter().any(|r| r.kind == kind))
    }
}
