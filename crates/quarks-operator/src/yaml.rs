//! Utility functions for writing Kubernetes objects in the YAML file format
use std::io::Write;

use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to write YAML document separator"))]
    WriteDocumentSeparator { source: std::io::Error },

    #[snafu(display("failed to write YAML to stdout"))]
    WriteToStdout { source: std::io::Error },
}

/// Provides configurable options during YAML serialization.
pub struct SerializeOptions {
    /// Adds leading triple dashes (`---`) to the output string.
    pub explicit_document: bool,

    /// Serialize enum variants as YAML maps using the variant name as the key.
    pub singleton_map: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            explicit_document: true,
            singleton_map: true,
        }
    }
}

/// Provides YAML output for Kubernetes custom resource definitions.
pub trait CustomResourceExt: kube::CustomResourceExt {
    /// Generates the YAML schema of a `CustomResourceDefinition` as an explicit document.
    fn yaml_schema() -> Result<String> {
        let mut buffer = Vec::new();
        serialize(&Self::crd(), &mut buffer, SerializeOptions::default())?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Prints the YAML schema of a `CustomResourceDefinition` to [stdout].
    ///
    /// [stdout]: std::io::stdout
    fn print_yaml_schema() -> Result<()> {
        let schema = Self::yaml_schema()?;
        std::io::stdout()
            .write_all(schema.as_bytes())
            .context(WriteToStdoutSnafu)
    }
}

impl<T> CustomResourceExt for T where T: kube::CustomResourceExt {}

/// Serializes the given data structure and writes it to a [`Writer`](Write).
pub fn serialize<T, W>(value: &T, mut writer: W, options: SerializeOptions) -> Result<()>
where
    T: serde::Serialize,
    W: std::io::Write,
{
    if options.explicit_document {
        writer
            .write_all(b"---\n")
            .context(WriteDocumentSeparatorSnafu)?;
    }

    let mut serializer = serde_yaml::Serializer::new(writer);

    if options.singleton_map {
        serde_yaml::with::singleton_map_recursive::serialize(value, &mut serializer)
            .context(SerializeYamlSnafu)?;
    } else {
        value
            .serialize(&mut serializer)
            .context(SerializeYamlSnafu)?;
    }

    Ok(())
}
