//! Redeploys an instance group whenever the data gathering job writes a new version of its BPM
//! information.
//!
//! The BPM secrets carry the deployment name and the sanitized instance group name (the remote
//! id) as labels. Only the latest version of a secret is acted on, and only once.
use std::sync::Arc;

use bosh_manifest::names::{self, DeploymentSecretType};
use jiff::Timestamp;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    ResourceExt,
    core::DynamicObject,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, instrument};

use crate::{
    client,
    controller::{
        Context, DEPENDENCY_REQUEUE_AFTER, DeployError, bpm_info, deploy_instance_group,
        desired_manifest, gathered_secret, meltdown, secret_version,
    },
    crd::{LABEL_DEPLOYMENT_NAME, LABEL_REMOTE_ID},
    logging::controller::ReconcilerError,
};

pub const CONTROLLER_NAME: &str = "bpm-secret";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("secret has no label {label}"))]
    MissingLabel { label: &'static str },

    #[snafu(display("failed to read the latest BPM information"))]
    ReadLatestVersion { source: DeployError },

    #[snafu(display("failed to read the desired manifest"))]
    ReadDesiredManifest { source: DeployError },

    #[snafu(display("failed to get BOSHDeployment {name:?}"))]
    GetDeployment { source: client::Error, name: String },

    #[snafu(display(
        "desired manifest of {deployment:?} has no instance group {instance_group:?}"
    ))]
    UnknownInstanceGroup {
        deployment: String,
        instance_group: String,
    },

    #[snafu(display("failed to read the BPM information"))]
    ReadBpmInfo { source: DeployError },

    #[snafu(display("failed to read the resolved properties"))]
    ReadResolvedProperties { source: DeployError },

    #[snafu(display("failed to deploy instance group {instance_group:?}"))]
    DeployInstanceGroup {
        source: DeployError,
        instance_group: String,
    },

    #[snafu(display("failed to record the reconcile time"))]
    RecordReconcile { source: client::Error },

    #[snafu(display("reconcile did not finish within {}", humantime::format_duration(*timeout)))]
    Timeout {
        source: tokio::time::error::Elapsed,
        timeout: std::time::Duration,
    },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ObjectHasNoNamespace
                | Self::MissingLabel { .. }
                | Self::UnknownInstanceGroup { .. }
        )
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::ReadLatestVersion { source }
            | Self::ReadDesiredManifest { source }
            | Self::ReadBpmInfo { source }
            | Self::ReadResolvedProperties { source }
            | Self::DeployInstanceGroup { source, .. } => {
                source.secret().map(|secret| secret.clone().erase())
            }
            _ => None,
        }
    }
}

#[instrument(skip_all, fields(secret = %secret.name_any()))]
pub async fn reconcile(secret: Arc<Secret>, ctx: Arc<Context>) -> Result<Action> {
    let timeout = ctx.config.ctx_timeout;
    tokio::time::timeout(timeout, reconcile_secret(&secret, &ctx))
        .await
        .context(TimeoutSnafu { timeout })?
}

async fn reconcile_secret(secret: &Secret, ctx: &Context) -> Result<Action> {
    if meltdown::in_meltdown(
        secret.annotations(),
        ctx.config.meltdown_duration,
        Timestamp::now(),
    ) {
        info!("Resource is in meltdown, requeue reconcile");
        return Ok(Action::requeue(ctx.config.meltdown_requeue_after));
    }
    // Versions are immutable, each one is deployed once.
    if meltdown::reconciled_at(secret.annotations()).is_some() {
        debug!("Skip reconcile: this version of the BPM information is deployed");
        return Ok(Action::await_change());
    }

    let namespace = secret.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let label = |label: &'static str| {
        secret
            .labels()
            .get(label)
            .context(MissingLabelSnafu { label })
    };
    let deployment_name = label(LABEL_DEPLOYMENT_NAME)?;
    let remote_id = label(LABEL_REMOTE_ID)?;

    let latest = gathered_secret(
        ctx,
        &namespace,
        deployment_name,
        DeploymentSecretType::InstanceGroupBpm,
        remote_id,
    )
    .await
    .context(ReadLatestVersionSnafu)?;
    if latest.is_none_or(|latest| latest.name_any() != secret.name_any()) {
        debug!("Skip reconcile: a newer version of the BPM information exists");
        return Ok(Action::await_change());
    }

    let Some(manifest) = desired_manifest(ctx, &namespace, deployment_name)
        .await
        .context(ReadDesiredManifestSnafu)?
    else {
        info!(deployment = deployment_name, "Waiting for the desired manifest");
        return Ok(Action::requeue(DEPENDENCY_REQUEUE_AFTER));
    };

    let Some(deployment) = ctx
        .cluster
        .get_deployment(&namespace, deployment_name)
        .await
        .context(GetDeploymentSnafu {
            name: deployment_name,
        })?
    else {
        info!(deployment = deployment_name, "Skip reconcile: BOSHDeployment is gone");
        return Ok(Action::await_change());
    };

    let instance_group = manifest
        .instance_groups
        .iter()
        .find(|ig| names::sanitize(&ig.name) == *remote_id)
        .context(UnknownInstanceGroupSnafu {
            deployment: deployment_name,
            instance_group: remote_id,
        })?;
    let info = bpm_info(secret).context(ReadBpmInfoSnafu)?;

    let Some(resolved) = gathered_secret(
        ctx,
        &namespace,
        deployment_name,
        DeploymentSecretType::InstanceGroupResolvedProperties,
        remote_id,
    )
    .await
    .context(ReadResolvedPropertiesSnafu)?
    else {
        info!(instance_group = remote_id, "Waiting for the resolved properties");
        return Ok(Action::requeue(DEPENDENCY_REQUEUE_AFTER));
    };
    let resolved_version = secret_version(&resolved).context(ReadResolvedPropertiesSnafu)?;

    deploy_instance_group(
        ctx,
        &deployment,
        &namespace,
        &manifest,
        instance_group,
        &info.configs,
        &resolved_version,
    )
    .await
    .context(DeployInstanceGroupSnafu {
        instance_group: &instance_group.name,
    })?;

    ctx.cluster
        .annotate_secret(secret, meltdown::last_reconcile(Timestamp::now()))
        .await
        .context(RecordReconcileSnafu)?;
    Ok(Action::await_change())
}
