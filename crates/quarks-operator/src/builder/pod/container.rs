use std::fmt;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, Probe,
    ResourceRequirements, SecurityContext, VolumeMount,
};

/// A builder to build [`Container`] objects.
///
/// Volume mounts are de-duplicated by mount path, the first mount for a path wins.
#[derive(Clone, Default)]
pub struct ContainerBuilder {
    args: Option<Vec<String>>,
    container_ports: Option<Vec<ContainerPort>>,
    command: Option<Vec<String>>,
    env: Option<Vec<EnvVar>>,
    image: Option<String>,
    image_pull_policy: Option<String>,
    name: String,
    resources: Option<ResourceRequirements>,
    volume_mounts: Option<Vec<VolumeMount>>,
    readiness_probe: Option<Probe>,
    liveness_probe: Option<Probe>,
    security_context: Option<SecurityContext>,
    working_dir: Option<String>,
}

impl ContainerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn image(&mut self, image: impl Into<String>) -> &mut Self {
        self.image = Some(image.into());
        self
    }

    pub fn image_pull_policy(&mut self, image_pull_policy: impl Into<String>) -> &mut Self {
        self.image_pull_policy = Some(image_pull_policy.into());
        self
    }

    pub fn add_env_var(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.into(),
            value: Some(value.into()),
            ..EnvVar::default()
        });
        self
    }

    /// Used for pushing down attributes like the Pod's IP or labels into the containers.
    pub fn add_env_var_from_field_path(
        &mut self,
        name: impl Into<String>,
        field_path: &FieldPathEnvVar,
    ) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.into(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: field_path.to_string(),
                    ..ObjectFieldSelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        });
        self
    }

    pub fn add_env_vars(&mut self, env_vars: impl IntoIterator<Item = EnvVar>) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).extend(env_vars);
        self
    }

    pub fn command(&mut self, command: Vec<String>) -> &mut Self {
        self.command = Some(command);
        self
    }

    /// Empty argument lists are dropped.
    pub fn args(&mut self, args: Vec<String>) -> &mut Self {
        self.args = (!args.is_empty()).then_some(args);
        self
    }

    pub fn working_dir(&mut self, working_dir: Option<impl Into<String>>) -> &mut Self {
        self.working_dir = working_dir.map(Into::into);
        self
    }

    pub fn add_container_ports(
        &mut self,
        container_ports: impl IntoIterator<Item = ContainerPort>,
    ) -> &mut Self {
        self.container_ports
            .get_or_insert_with(Vec::new)
            .extend(container_ports);
        self
    }

    pub fn resources(&mut self, resources: ResourceRequirements) -> &mut Self {
        self.resources = Some(resources);
        self
    }

    pub fn add_volume_mount(
        &mut self,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> &mut Self {
        self.add_volume_mounts([VolumeMount {
            name: name.into(),
            mount_path: path.into(),
            ..VolumeMount::default()
        }])
    }

    /// Adds the mounts in order, skipping every mount whose path is already mounted.
    pub fn add_volume_mounts(
        &mut self,
        volume_mounts: impl IntoIterator<Item = VolumeMount>,
    ) -> &mut Self {
        let mounts = self.volume_mounts.get_or_insert_with(Vec::new);
        for volume_mount in volume_mounts {
            if !mounts.iter().any(|m| m.mount_path == volume_mount.mount_path) {
                mounts.push(volume_mount);
            }
        }
        self
    }

    pub fn readiness_probe(&mut self, probe: Option<Probe>) -> &mut Self {
        self.readiness_probe = probe;
        self
    }

    pub fn liveness_probe(&mut self, probe: Option<Probe>) -> &mut Self {
        self.liveness_probe = probe;
        self
    }

    pub fn security_context(&mut self, context: SecurityContext) -> &mut Self {
        self.security_context = Some(context);
        self
    }

    pub fn build(&self) -> Container {
        Container {
            args: self.args.clone(),
            command: self.command.clone(),
            env: self.env.clone(),
            image: self.image.clone(),
            image_pull_policy: self.image_pull_policy.clone(),
            resources: self.resources.clone(),
            name: self.name.clone(),
            ports: self.container_ports.clone(),
            volume_mounts: self.volume_mounts.clone(),
            readiness_probe: self.readiness_probe.clone(),
            liveness_probe: self.liveness_probe.clone(),
            security_context: self.security_context.clone(),
            working_dir: self.working_dir.clone(),
            ..Container::default()
        }
    }
}

/// A builder to build [`ContainerPort`] objects.
#[derive(Clone, Default)]
pub struct ContainerPortBuilder {
    container_port: i32,
    name: Option<String>,
    protocol: Option<String>,
}

impl ContainerPortBuilder {
    pub fn new(container_port: i32) -> Self {
        Self {
            container_port,
            ..Self::default()
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn protocol(&mut self, protocol: impl Into<String>) -> &mut Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn build(&self) -> ContainerPort {
        ContainerPort {
            container_port: self.container_port,
            name: self.name.as_ref().map(|s| s.to_lowercase()),
            protocol: self.protocol.clone(),
            ..ContainerPort::default()
        }
    }
}

/// Downward API capabilities available via `fieldRef`
/// See: <https://kubernetes.io/docs/tasks/inject-data-application/downward-api-volume-expose-pod-information/#capabilities-of-the-downward-api>
#[derive(Debug)]
pub enum FieldPathEnvVar {
    PodIp,
    Labels(String),
}

impl fmt::Display for FieldPathEnvVar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::PodIp => write!(f, "status.podIP"),
            Self::Labels(name) => write!(f, "metadata.labels['{name}']"),
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;

    #[test]
    fn test_container_builder() {
        let resources = ResourceRequirements {
            limits: Some([("memory".to_owned(), Quantity("1Gi".to_owned()))].into()),
            requests: Some([("cpu".to_owned(), Quantity("100m".to_owned()))].into()),
            ..ResourceRequirements::default()
        };

        let container = ContainerBuilder::new("nats-nats")
            .image("docker.io/cfcontainerization/nats:opensuse-42.3-26")
            .command(vec!["/var/vcap/packages/gnatsd/bin/gnatsd".to_owned()])
            .args(vec![])
            .add_env_var("foo", "bar")
            .add_volume_mount("jobs-dir", "/var/vcap/jobs")
            .add_container_ports([ContainerPortBuilder::new(4222)
                .name("NATS")
                .protocol("TCP")
                .build()])
            .resources(resources.clone())
            .build();

        assert_eq!(container.name, "nats-nats");
        assert_eq!(container.args, None);
        assert!(matches!(
            container.env.as_deref(),
            Some([EnvVar { name, value: Some(value), .. }]) if name == "foo" && value == "bar"
        ));
        assert!(matches!(
            container.volume_mounts.as_deref(),
            Some([VolumeMount { mount_path, name, .. }])
                if mount_path == "/var/vcap/jobs" && name == "jobs-dir"
        ));
        assert_eq!(
            container
                .ports
                .as_ref()
                .map(|ports| (ports[0].name.as_deref(), ports[0].container_port)),
            Some((Some("nats"), 4222))
        );
        assert_eq!(container.resources, Some(resources));
    }

    #[test]
    fn deduplicates_volume_mounts_by_path() {
        let container = ContainerBuilder::new("c")
            .add_volume_mount("first", "/var/vcap/data")
            .add_volume_mounts([
                VolumeMount {
                    name: "second".to_owned(),
                    mount_path: "/var/vcap/data".to_owned(),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: "sys-dir".to_owned(),
                    mount_path: "/var/vcap/sys".to_owned(),
                    ..VolumeMount::default()
                },
            ])
            .build();

        let names: Vec<_> = container
            .volume_mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["first", "sys-dir"]);
    }

    #[test]
    pub fn test_field_ref_env_var_serialization() {
        assert_eq!(
            "metadata.labels['some-label-name']",
            FieldPathEnvVar::Labels("some-label-name".to_owned()).to_string()
        );
        assert_eq!("status.podIP", FieldPathEnvVar::PodIp.to_string());
    }
}
