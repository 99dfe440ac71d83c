//! Drives a [`BoshDeployment`] from its manifest to running workloads, one phase per reconcile.
//!
//! The manifest is resolved on every run. Its SHA1 is stored in an annotation, a changed hash
//! restarts the pipeline. The phases are:
//!
//! 1. `Created`/`Updated`: record the manifest hash,
//! 2. `OpsApplied`: request a generated secret for every manifest variable,
//! 3. `VariableGenerated`: store the manifest with ops and start the variable interpolation job,
//! 4. `VariableInterpolated`: start the data gathering jobs,
//! 5. `DataGathered`: wait for the gathered data and deploy every instance group,
//! 6. `Deploying`: mark the deployment as deployed.
use std::{sync::Arc, time::Duration};

use bosh_manifest::{
    Manifest, manifest,
    names::{self, DeploymentSecretType},
};
use k8s_openapi::{
    ByteString, api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    Resource, ResourceExt,
    core::DynamicObject,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, instrument};

use crate::{
    builder::meta::ObjectMetaBuilder,
    client,
    controller::{
        Context, DEPENDENCY_REQUEUE_AFTER, DeployError, DeploymentState, deploy_instance_group,
        desired_manifest, gathered_secret,
    },
    converter::{
        job_factory::{self, Gathering, JobFactory, MANIFEST_KEY},
        kube_converter::KubeConverter,
    },
    crd::{ANNOTATION_MANIFEST_SHA1, BoshDeployment, QuarksJob},
    logging::controller::ReconcilerError,
    resolver,
};

pub const CONTROLLER_NAME: &str = "boshdeployment";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("deployment has no uid to own its resources"))]
    MissingOwnerReference,

    #[snafu(display("failed to resolve the manifest"))]
    ResolveManifest { source: resolver::Error },

    #[snafu(display("failed to calculate the SHA1 of the manifest"))]
    HashManifest { source: manifest::Error },

    #[snafu(display("unknown deployment state {state:?}"))]
    UnknownState {
        source: strum::ParseError,
        state: String,
    },

    #[snafu(display("failed to record the manifest SHA1"))]
    RecordManifestSha1 { source: client::Error },

    #[snafu(display("failed to update the deployment state to {state}"))]
    UpdateState {
        source: client::Error,
        state: DeploymentState,
    },

    #[snafu(display("failed to apply the QuarksSecret {name:?}"))]
    ApplyVariable { source: client::Error, name: String },

    #[snafu(display("failed to serialize the manifest with ops"))]
    SerializeManifest { source: manifest::Error },

    #[snafu(display("failed to apply the manifest with ops secret {name:?}"))]
    ApplyManifestWithOps { source: client::Error, name: String },

    #[snafu(display("failed to generate the data gathering jobs"))]
    GenerateGatheringJob { source: job_factory::Error },

    #[snafu(display("failed to apply the QuarksJob {name:?}"))]
    ApplyJob { source: client::Error, name: String },

    #[snafu(display("failed to read the desired manifest"))]
    ReadDesiredManifest { source: DeployError },

    #[snafu(display("failed to read the gathered data of instance group {instance_group:?}"))]
    ReadGatheredData {
        source: DeployError,
        instance_group: String,
    },

    #[snafu(display("failed to deploy instance group {instance_group:?}"))]
    DeployInstanceGroup {
        source: DeployError,
        instance_group: String,
    },

    #[snafu(display("reconcile did not finish within {}", humantime::format_duration(*timeout)))]
    Timeout {
        source: tokio::time::error::Elapsed,
        timeout: Duration,
    },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    /// Errors which need a change of the deployment to go away.
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ObjectHasNoNamespace | Self::MissingOwnerReference | Self::UnknownState { .. }
        )
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::ReadDesiredManifest { source }
            | Self::ReadGatheredData { source, .. }
            | Self::DeployInstanceGroup { source, .. } => {
                source.secret().map(|secret| secret.clone().erase())
            }
            _ => None,
        }
    }
}

#[instrument(skip_all, fields(deployment = %deployment.name_any()))]
pub async fn reconcile(deployment: Arc<BoshDeployment>, ctx: Arc<Context>) -> Result<Action> {
    info!("Reconciling BOSHDeployment");
    let timeout = ctx.config.ctx_timeout;
    tokio::time::timeout(timeout, reconcile_deployment(&deployment, &ctx))
        .await
        .context(TimeoutSnafu { timeout })?
}

async fn reconcile_deployment(deployment: &BoshDeployment, ctx: &Context) -> Result<Action> {
    let namespace = deployment.namespace().context(ObjectHasNoNamespaceSnafu)?;

    let manifest = ctx
        .resolver
        .resolve_manifest(deployment, &namespace)
        .await
        .context(ResolveManifestSnafu)?
        .manifest;
    let sha1 = manifest.sha1().context(HashManifestSnafu)?;

    let stored_state = deployment
        .status
        .as_ref()
        .and_then(|status| status.state.as_deref());
    let stored_sha1 = deployment
        .annotations()
        .get(ANNOTATION_MANIFEST_SHA1)
        .map(String::as_str);
    let state = DeploymentState::current(stored_state, stored_sha1, &sha1).context(
        UnknownStateSnafu {
            state: stored_state.unwrap_or_default(),
        },
    )?;
    debug!(%state, "BOSHDeployment is in state");

    let owner = deployment
        .controller_owner_ref(&())
        .context(MissingOwnerReferenceSnafu)?;
    let phase = Phase {
        ctx,
        deployment,
        namespace: &namespace,
        manifest: &manifest,
        owner: &owner,
    };

    match state {
        DeploymentState::Created | DeploymentState::Updated => {}
        DeploymentState::OpsApplied => phase.generate_variables().await?,
        DeploymentState::VariableGenerated => phase.interpolate_variables().await?,
        DeploymentState::VariableInterpolated => phase.gather_data().await?,
        DeploymentState::DataGathered => {
            if let Some(wait) = phase.deploy_instance_groups().await? {
                return Ok(wait);
            }
        }
        DeploymentState::Deploying => {}
        DeploymentState::Deployed => {
            info!("Skip reconcile: deployed manifest has not changed");
            return Ok(Action::await_change());
        }
    }

    let Some(next) = state.next() else {
        return Ok(Action::await_change());
    };
    ctx.cluster
        .update_deployment_state(deployment, &next.to_string())
        .await
        .context(UpdateStateSnafu { state: next })?;
    // Written after the state, a lost state update leaves the old hash and restarts the pipeline.
    if matches!(state, DeploymentState::Created | DeploymentState::Updated) {
        phase.record_manifest_sha1(&sha1).await?;
    }
    debug!(%next, "Requeue the reconcile");
    Ok(Action::requeue(Duration::ZERO))
}

/// The work of one phase.
struct Phase<'a> {
    ctx: &'a Context,
    deployment: &'a BoshDeployment,
    namespace: &'a str,
    manifest: &'a Manifest,
    owner: &'a OwnerReference,
}

impl Phase<'_> {
    fn job_factory(&self) -> JobFactory<'_> {
        JobFactory {
            namespace: self.namespace,
            operator_image: &self.ctx.config.operator_image,
            owner: Some(self.owner),
        }
    }

    async fn record_manifest_sha1(&self, sha1: &str) -> Result<()> {
        self.ctx
            .cluster
            .annotate_deployment(
                self.deployment,
                [(ANNOTATION_MANIFEST_SHA1.to_owned(), sha1.to_owned())].into(),
            )
            .await
            .context(RecordManifestSha1Snafu)
    }

    async fn generate_variables(&self) -> Result<()> {
        let converter = KubeConverter {
            namespace: self.namespace,
            operator_image: &self.ctx.config.operator_image,
            owner: Some(self.owner),
        };
        for variable in converter.variables(self.manifest) {
            let name = variable.name_any();
            let operation = self
                .ctx
                .cluster
                .apply_quarks_secret(variable)
                .await
                .context(ApplyVariableSnafu { name: &name })?;
            debug!(%name, %operation, "applied variable QuarksSecret");
        }
        Ok(())
    }

    async fn interpolate_variables(&self) -> Result<()> {
        let deployment = self.manifest.name.as_str();
        let name =
            names::calculate_secret_name(DeploymentSecretType::ManifestWithOps, deployment, "");
        let manifest_yaml = self.manifest.to_yaml().context(SerializeManifestSnafu)?;
        let secret = Secret {
            metadata: ObjectMetaBuilder::for_deployment(&name, self.namespace, deployment)
                .secret_type(DeploymentSecretType::ManifestWithOps)
                .owner(Some(self.owner))
                .build(),
            data: Some([(MANIFEST_KEY.to_owned(), ByteString(manifest_yaml.into_bytes()))].into()),
            ..Secret::default()
        };
        self.ctx
            .cluster
            .apply_secret(secret)
            .await
            .context(ApplyManifestWithOpsSnafu { name: &name })?;

        let job = self.job_factory().variable_interpolation_job(self.manifest);
        self.apply_job(job).await
    }

    async fn gather_data(&self) -> Result<()> {
        for gathering in [Gathering::ResolvedProperties, Gathering::Bpm] {
            let job = self
                .job_factory()
                .gathering_job(self.manifest, gathering)
                .context(GenerateGatheringJobSnafu)?;
            self.apply_job(job).await?;
        }
        Ok(())
    }

    async fn apply_job(&self, job: QuarksJob) -> Result<()> {
        let name = job.name_any();
        let operation = self
            .ctx
            .cluster
            .apply_quarks_job(job)
            .await
            .context(ApplyJobSnafu { name: &name })?;
        debug!(%name, %operation, "applied QuarksJob");
        Ok(())
    }

    /// Deploys every instance group of the desired manifest once all of them have their
    /// resolved properties and BPM information. Returns the requeue action while waiting.
    async fn deploy_instance_groups(&self) -> Result<Option<Action>> {
        let deployment = self.manifest.name.as_str();
        let wait = Some(Action::requeue(DEPENDENCY_REQUEUE_AFTER));

        let Some(desired) = desired_manifest(self.ctx, self.namespace, deployment)
            .await
            .context(ReadDesiredManifestSnafu)?
        else {
            info!("Waiting for the desired manifest");
            return Ok(wait);
        };

        let mut gathered = Vec::new();
        for instance_group in desired.instance_groups.iter().filter(|ig| ig.instances != 0) {
            let ig = instance_group.name.as_str();
            let resolved = gathered_secret(
                self.ctx,
                self.namespace,
                deployment,
                DeploymentSecretType::InstanceGroupResolvedProperties,
                ig,
            )
            .await
            .context(ReadGatheredDataSnafu { instance_group: ig })?;
            let bpm = gathered_secret(
                self.ctx,
                self.namespace,
                deployment,
                DeploymentSecretType::InstanceGroupBpm,
                ig,
            )
            .await
            .context(ReadGatheredDataSnafu { instance_group: ig })?;
            let (Some(resolved), Some(bpm)) = (resolved, bpm) else {
                info!(instance_group = ig, "Waiting for BPM information");
                return Ok(wait);
            };

            let version = super::secret_version(&resolved)
                .context(ReadGatheredDataSnafu { instance_group: ig })?;
            let info =
                super::bpm_info(&bpm).context(ReadGatheredDataSnafu { instance_group: ig })?;
            gathered.push((instance_group, info.configs, version));
        }

        for (instance_group, configs, version) in gathered {
            deploy_instance_group(
                self.ctx,
                self.deployment,
                self.namespace,
                &desired,
                instance_group,
                &configs,
                &version,
            )
            .await
            .context(DeployInstanceGroupSnafu {
                instance_group: &instance_group.name,
            })?;
        }
        Ok(None)
    }
}
