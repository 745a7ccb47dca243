//! The registration control loop.
//!
//! Every attempt walks the same sequence from the top:
//!
//! 1. fetch the triggering Deployment (gone means nothing to do),
//! 2. check that the DBaaSProvider API is served (if not, back off),
//! 3. resolve the ClusterRole that will own the registration,
//! 4. load the bundled definition,
//! 5. create or update `rds-registration`.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::Resource;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::context::AttemptContext;
use crate::definition::{self, ResourceDefinition};
use crate::discovery::TypeAvailabilityGate;
use crate::error::{is_api_code, Error, Phase, Result};
use crate::event::ObjectKey;
use crate::owner::OwnerResolver;
use crate::provider::{desired_provider, DBaaSProvider, OwnerCandidate, PROVIDER_CR_NAME};

/// How many times a write is attempted when it keeps hitting conflicts.
const MAX_CONFLICT_ATTEMPTS: u8 = 5;

/// What a successful attempt amounted to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The registration is in its desired state.
    Synced(UpsertResult),
    /// The triggering Deployment no longer exists; nothing to do.
    WorkloadGone,
    /// The DBaaSProvider API is not served yet; try again later.
    TypeUnavailable,
}

/// What the create-or-update did to the stored registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpsertResult {
    /// The registration did not exist and was created.
    Created,
    /// The registration existed and differed from the desired state.
    Updated,
    /// The registration already matched the desired state.
    Unchanged,
}

/// Drives one reconciliation attempt for the operator's Deployment.
#[derive(Clone)]
pub struct Reconciler {
    client: Client,
    config: Arc<Config>,
    gate: TypeAvailabilityGate,
    owners: OwnerResolver,
    providers: Api<DBaaSProvider>,
}

impl Reconciler {
    /// Create a reconciler using `client` and the startup `config`.
    pub fn new(client: Client, config: Arc<Config>) -> Self {
        Reconciler {
            gate: TypeAvailabilityGate::new(client.clone()),
            owners: OwnerResolver::new(client.clone(), &config.operator_name),
            providers: Api::all(client.clone()),
            client,
            config,
        }
    }

    /// Runs one attempt for the Deployment identified by `key`.
    ///
    /// Faults are logged with the phase they came from and returned so the
    /// caller can requeue with its default policy.
    #[tracing::instrument(
        level = "info",
        skip(self, key, ctx),
        fields(namespace = key.namespace().unwrap_or_default(), name = key.name())
    )]
    pub async fn reconcile(&self, key: &ObjectKey, ctx: &AttemptContext) -> Result<Outcome> {
        let result = self.run(key, ctx).await;
        match &result {
            Ok(outcome) => debug!(?outcome, "Reconciliation finished"),
            Err(e @ Error::OwnerNotFound { .. }) => error!(
                phase = %e.phase(),
                error = %e,
                "Could not find ClusterRole owned by the ClusterServiceVersion to inherit operand"
            ),
            Err(e) => error!(phase = %e.phase(), error = %e, "Reconciliation failed"),
        }
        result
    }

    async fn run(&self, key: &ObjectKey, ctx: &AttemptContext) -> Result<Outcome> {
        if self.fetch_workload(key, ctx).await?.is_none() {
            info!(phase = %Phase::FetchWorkload, "Deployment not found, deleted, no requeue");
            return Ok(Outcome::WorkloadGone);
        }

        let served = ctx
            .run(
                Phase::CheckGate,
                self.gate
                    .is_available(DBaaSProvider::API_VERSION, DBaaSProvider::KIND),
            )
            .await?;
        if !served {
            info!(
                phase = %Phase::CheckGate,
                group_version = DBaaSProvider::API_VERSION,
                kind = DBaaSProvider::KIND,
                "CRD not found, requeueing with rate limiter"
            );
            return Ok(Outcome::TypeUnavailable);
        }

        let owner = ctx
            .run(Phase::ResolveOwner, self.owners.find_owner())
            .await?;
        debug!(owner = %owner.name, "Resolved registration owner");

        let path = self.config.definition_path();
        let definition = ctx
            .run(Phase::LoadDefinition, definition::load(&path))
            .await?;

        let result = ctx
            .run(Phase::Upsert, self.upsert(&definition, &owner))
            .await?;
        info!(
            phase = %Phase::Upsert,
            registration = PROVIDER_CR_NAME,
            ?result,
            "Cluster-scoped resource created or updated"
        );
        Ok(Outcome::Synced(result))
    }

    async fn fetch_workload(
        &self,
        key: &ObjectKey,
        ctx: &AttemptContext,
    ) -> Result<Option<Deployment>> {
        let namespace = key
            .namespace()
            .unwrap_or(self.config.install_namespace.as_str());
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        ctx.run(Phase::FetchWorkload, async {
            match deployments.get(key.name()).await {
                Ok(deployment) => Ok(Some(deployment)),
                Err(e) if is_api_code(&e, 404) => Ok(None),
                Err(source) => Err(Error::FetchWorkload {
                    namespace: namespace.to_string(),
                    name: key.name().to_string(),
                    source,
                }),
            }
        })
        .await
    }

    async fn upsert(
        &self,
        definition: &ResourceDefinition,
        owner: &OwnerCandidate,
    ) -> Result<UpsertResult> {
        create_or_update(&self.providers, PROVIDER_CR_NAME, |existing| {
            desired_provider(existing, definition, owner)
        })
        .await
        .map_err(|source| Error::Upsert {
            name: PROVIDER_CR_NAME.to_string(),
            source,
        })
    }
}

/// Creates `name` if absent, otherwise replaces it when `desired` differs
/// from what is stored.
///
/// `desired` may be called once per attempt; write conflicts re-read the
/// object and try again.
pub async fn create_or_update<F>(
    api: &Api<DBaaSProvider>,
    name: &str,
    desired: F,
) -> std::result::Result<UpsertResult, kube::Error>
where
    F: Fn(Option<&DBaaSProvider>) -> DBaaSProvider,
{
    let mut attempt = 0u8;
    let mut pause = Duration::from_millis(10);
    loop {
        attempt += 1;
        let result = match api.get(name).await {
            Ok(existing) => {
                let wanted = desired(Some(&existing));
                if wanted == existing {
                    return Ok(UpsertResult::Unchanged);
                }
                api.replace(name, &PostParams::default(), &wanted)
                    .await
                    .map(|_| UpsertResult::Updated)
            }
            Err(e) if is_api_code(&e, 404) => api
                .create(&PostParams::default(), &desired(None))
                .await
                .map(|_| UpsertResult::Created),
            Err(e) => Err(e),
        };
        match result {
            Err(e) if is_api_code(&e, 409) && attempt < MAX_CONFLICT_ATTEMPTS => {
                debug!(name, attempt, "Write conflict, retrying with latest version");
                tokio::time::sleep(pause).await;
                pause *= 2;
            }
            other => return other,
        }
    }
}
