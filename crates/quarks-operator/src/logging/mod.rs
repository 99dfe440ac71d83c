use std::{
    io::{Sink, sink},
    path::PathBuf,
};

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        MakeWriter,
        writer::{EitherWriter, MakeWriterExt as _},
    },
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

pub mod controller;
mod k8s_events;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid log filter in {env}"))]
    InvalidFilter {
        source: tracing_subscriber::filter::FromEnvError,
        env: String,
    },

    #[snafu(display("failed to initialize rolling file appender in {}", directory.display()))]
    RollingFileAppender {
        source: tracing_appender::rolling::InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Initializes `tracing` logging with options from the environment variable
/// given in the `env` parameter.
///
/// If the variable is not set, the maximum log level is INFO.
///
/// Log output can be copied to a file by setting `{env}_DIRECTORY` (e.g.
/// `QUARKS_OPERATOR_LOG_DIRECTORY`) to a directory path. This file will be rotated regularly.
pub fn initialize_logging(env: &str, app_name: &str, format: LogFormat) -> Result<(), Error> {
    let filter = match std::env::var_os(env) {
        Some(_) => EnvFilter::try_from_env(env).context(InvalidFilterSnafu { env })?,
        None => EnvFilter::new(tracing::Level::INFO.to_string()),
    };

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = match file_appender_directory.as_deref() {
        Some(directory) => Some(
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(directory)
                .context(RollingFileAppenderSnafu { directory })?,
        ),
        None => None,
    };
    let writer = std::io::stdout.and(OptionalMakeWriter::from(file_appender));

    let (plain, json) = match format {
        LogFormat::Plain => (
            Some(tracing_subscriber::fmt::layer().with_writer(writer)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_writer(writer)),
        ),
    };

    Registry::default()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }
    Ok(())
}

/// Like [`EitherWriter`] but implements [`MakeWriter`] instead of [`std::io::Write`].
/// For selecting writers depending on dynamic configuration.
enum EitherMakeWriter<A, B> {
    A(A),
    B(B),
}

impl<'a, A, B> MakeWriter<'a> for EitherMakeWriter<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = EitherWriter<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer()),
            Self::B(b) => EitherWriter::B(b.make_writer()),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer_for(meta)),
            Self::B(b) => EitherWriter::B(b.make_writer_for(meta)),
        }
    }
}

type OptionalMakeWriter<T> = EitherMakeWriter<T, fn() -> Sink>;

impl<T> From<Option<T>> for OptionalMakeWriter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Self::A(t),
            None => Self::B(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info};

    use super::*;

    // Mostly a sanity check, run with --nocapture to see the output.
    #[test]
    fn default_tracing_level_is_info() {
        initialize_logging("QUARKS_OPERATOR_TEST_LOG_NOT_SET", "test", LogFormat::Plain)
            .expect("logging initializes once per test binary");

        error!("ERROR level messages should be seen.");
        info!("INFO level messages should also be seen by default.");
        debug!("DEBUG level messages should be seen only if you set the log level.");

        assert!(
            initialize_logging("QUARKS_OPERATOR_TEST_LOG_NOT_SET", "test", LogFormat::Json)
                .is_err(),
            "the global subscriber can only be installed once"
        );
    }
}
