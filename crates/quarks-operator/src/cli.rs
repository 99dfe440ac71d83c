//! The command line of the `quarks-operator` binary.
//!
//! Besides running the controllers, the binary implements the helper commands the jobs created by
//! the operator run, see [`UtilCommand`].
use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{DEFAULT_OPERATOR_IMAGE, DEFAULT_PULL_POLICY, OperatorConfig, OperatorImage},
    logging::LogFormat,
};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "quarks-operator",
    author,
    version,
    about = "Kubernetes operator deploying BOSH releases"
)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print CRD objects.
    Crd,

    /// Run the operator.
    Run(RunArguments),

    /// Helpers run inside the jobs created by the operator.
    #[command(subcommand)]
    Util(UtilCommand),
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum UtilCommand {
    /// Interpolate the generated variables into a manifest.
    ///
    /// Writes the JSON document `{"manifest.yaml": <manifest>}`, which the job runner stores as
    /// the desired manifest.
    VariableInterpolation(VariableInterpolationArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(long_about = "")]
pub struct RunArguments {
    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env)]
    pub watch_namespace: Option<String>,

    /// Image of the helper containers and jobs, usually the image of the operator itself
    #[arg(long, env, default_value = DEFAULT_OPERATOR_IMAGE)]
    pub operator_image: String,

    #[arg(long, env, default_value = DEFAULT_PULL_POLICY)]
    pub operator_image_pull_policy: String,

    /// Deadline for a single reconcile run
    #[arg(long, env, default_value = "5m", value_parser = humantime::parse_duration)]
    pub ctx_timeout: Duration,

    /// Secrets reconciled within this window are not reconciled again
    #[arg(long, env, default_value = "1m", value_parser = humantime::parse_duration)]
    pub meltdown_duration: Duration,

    /// When to look at a secret in meltdown again
    #[arg(long, env, default_value = "30s", value_parser = humantime::parse_duration)]
    pub meltdown_requeue_after: Duration,

    /// Number of objects each controller reconciles concurrently
    #[arg(long, env, default_value_t = 1)]
    pub max_workers: u16,

    #[arg(long, env, value_enum, default_value_t)]
    pub log_format: LogFormat,
}

impl RunArguments {
    pub fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            watch_namespace: self.watch_namespace.clone().filter(|ns| !ns.is_empty()),
            operator_image: OperatorImage {
                image: self.operator_image.clone(),
                pull_policy: self.operator_image_pull_policy.clone(),
            },
            ctx_timeout: self.ctx_timeout,
            meltdown_duration: self.meltdown_duration,
            meltdown_requeue_after: self.meltdown_requeue_after,
            max_workers: self.max_workers,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct VariableInterpolationArguments {
    /// Path to the manifest with all ops files applied
    #[arg(long, short = 'm', env = "BOSH_MANIFEST_PATH", value_name = "FILE")]
    pub manifest: PathBuf,

    /// Directory with one sub directory per variable secret
    #[arg(long, short = 'v', env = "VARIABLES_DIR", value_name = "DIR")]
    pub variables_dir: PathBuf,

    /// Where to write the output, stdout if not set
    #[arg(long, short = 'o', env = "OUTPUT_FILE_PATH", value_name = "FILE")]
    pub output_file_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn run_arguments(args: &[&str]) -> RunArguments {
        let opts = Opts::try_parse_from(["quarks-operator", "run"].iter().chain(args).copied())
            .expect("arguments are valid");
        match opts.command {
            Command::Run(arguments) => Some(arguments),
            _ => None,
        }
        .expect("run command is parsed")
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn run_defaults_match_the_default_config() {
        let arguments = run_arguments(&[]);
        assert_eq!(arguments.operator_config(), OperatorConfig::default());
        assert_eq!(arguments.log_format, LogFormat::Plain);
    }

    #[test]
    fn run_accepts_durations() {
        let config = run_arguments(&[
            "--watch-namespace",
            "staging",
            "--ctx-timeout",
            "90s",
            "--meltdown-duration",
            "2m 30s",
        ])
        .operator_config();
        assert_eq!(config.watch_namespace.as_deref(), Some("staging"));
        assert_eq!(config.ctx_timeout, Duration::from_secs(90));
        assert_eq!(config.meltdown_duration, Duration::from_secs(150));
    }

    #[test]
    fn run_rejects_invalid_durations() {
        assert!(Opts::try_parse_from(["quarks-operator", "run", "--ctx-timeout", "soon"]).is_err());
    }

    #[test]
    fn parses_variable_interpolation() {
        let opts = Opts::try_parse_from([
            "quarks-operator",
            "util",
            "variable-interpolation",
            "-m",
            "/var/run/secrets/deployment/manifest.yaml",
            "-v",
            "/var/run/secrets/variables",
        ])
        .expect("arguments are valid");
        assert_eq!(
            opts.command,
            Command::Util(UtilCommand::VariableInterpolation(
                VariableInterpolationArguments {
                    manifest: "/var/run/secrets/deployment/manifest.yaml".into(),
                    variables_dir: "/var/run/secrets/variables".into(),
                    output_file_path: None,
                }
            ))
        );
    }
}
