use std::{path::PathBuf, sync::Arc};

use bosh_manifest::{interpolate, names::DeploymentSecretType};
use clap::Parser;
use futures::{StreamExt, future};
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api,
    runtime::{Controller, controller, watcher},
};
use quarks_operator::{
    cli::{Command, Opts, RunArguments, UtilCommand, VariableInterpolationArguments},
    client::Client,
    controller::{Context, bpm_secret, deployment},
    crd::{
        BoshDeployment, LABEL_DEPLOYMENT_SECRET_TYPE, QuarksJob, QuarksSecret, QuarksStatefulSet,
    },
    logging::{
        self,
        controller::{error_policy, report_controller_reconciled},
    },
    resolver::{KubeSourceFetcher, Resolver},
    yaml::{self, CustomResourceExt},
};
use snafu::{ResultExt, Snafu};
use tokio::io::AsyncWriteExt;

const APP_NAME: &str = "quarks-operator";
const LOG_ENV: &str = "QUARKS_OPERATOR_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print the CRDs"))]
    PrintCrds { source: yaml::Error },

    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to read manifest {path:?}"))]
    ReadManifest {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to interpolate the variables in {variables_dir:?}"))]
    InterpolateVariables {
        source: interpolate::Error,
        variables_dir: PathBuf,
    },

    #[snafu(display("failed to write the output to {path:?}"))]
    WriteOutput {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write the output to stdout"))]
    WriteStdout { source: std::io::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.command {
        Command::Crd => {
            BoshDeployment::print_yaml_schema().context(PrintCrdsSnafu)?;
            QuarksJob::print_yaml_schema().context(PrintCrdsSnafu)?;
            QuarksSecret::print_yaml_schema().context(PrintCrdsSnafu)?;
            QuarksStatefulSet::print_yaml_schema().context(PrintCrdsSnafu)
        }
        Command::Run(arguments) => run(arguments).await,
        Command::Util(UtilCommand::VariableInterpolation(arguments)) => {
            variable_interpolation(arguments).await
        }
    }
}

async fn run(arguments: RunArguments) -> Result<(), Error> {
    logging::initialize_logging(LOG_ENV, APP_NAME, arguments.log_format)
        .context(InitializeLoggingSnafu)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting {APP_NAME}");

    let config = arguments.operator_config();
    let kube_client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;
    let client = Arc::new(Client::new(kube_client.clone(), Some(APP_NAME.to_owned())));
    let fetcher = Arc::new(KubeSourceFetcher::new(kube_client.clone()));
    let ctx = Arc::new(Context {
        cluster: client.clone(),
        secrets: client,
        resolver: Arc::new(Resolver::new(fetcher)),
        config: config.clone(),
    });

    let (deployments, secrets) = match config.watch_namespace.as_deref() {
        Some(namespace) => (
            Api::<BoshDeployment>::namespaced(kube_client.clone(), namespace),
            Api::<Secret>::namespaced(kube_client.clone(), namespace),
        ),
        None => (Api::all(kube_client.clone()), Api::all(kube_client.clone())),
    };
    tracing::info!(namespace = ?config.watch_namespace, "Watching BOSHDeployments");
    let controller_config = controller::Config::default().concurrency(config.max_workers);

    let deployment_controller = Controller::new(deployments, watcher::Config::default())
        .with_config(controller_config.clone())
        .shutdown_on_signal()
        .run(deployment::reconcile, error_policy, ctx.clone())
        .for_each(|result| {
            report_controller_reconciled(&kube_client, deployment::CONTROLLER_NAME, &result);
            future::ready(())
        });

    let bpm_secrets = format!(
        "{LABEL_DEPLOYMENT_SECRET_TYPE}={}",
        DeploymentSecretType::InstanceGroupBpm
    );
    let bpm_controller = Controller::new(secrets, watcher::Config::default().labels(&bpm_secrets))
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(bpm_secret::reconcile, error_policy, ctx)
        .for_each(|result| {
            report_controller_reconciled(&kube_client, bpm_secret::CONTROLLER_NAME, &result);
            future::ready(())
        });

    future::join(deployment_controller, bpm_controller).await;
    Ok(())
}

async fn variable_interpolation(arguments: VariableInterpolationArguments) -> Result<(), Error> {
    let VariableInterpolationArguments {
        manifest,
        variables_dir,
        output_file_path,
    } = arguments;

    let content = tokio::fs::read_to_string(&manifest)
        .await
        .context(ReadManifestSnafu { path: &manifest })?;
    let output = interpolate::interpolate_variables(&content, &variables_dir)
        .context(InterpolateVariablesSnafu {
            variables_dir: &variables_dir,
        })?;

    match output_file_path {
        Some(path) => tokio::fs::write(&path, output)
            .await
            .context(WriteOutputSnafu { path }),
        None => tokio::io::stdout()
            .write_all(&output)
            .await
            .context(WriteStdoutSnafu),
    }
}
