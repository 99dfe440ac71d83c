use k8s_openapi::api::core::v1::{Capabilities, SecurityContext};

/// User id of `vcap`, the unprivileged user BOSH jobs run as.
pub const VCAP_USER_ID: i64 = 1000;

pub const ROOT_USER_ID: i64 = 0;

/// A builder for [`SecurityContext`] objects (not to be confused with `PodSecurityContext`).
///
/// The `default_*` setters only fill fields which are still unset, so a context taken from the
/// manifest keeps precedence over values derived from BPM.
#[derive(Clone, Default)]
pub struct SecurityContextBuilder {
    security_context: SecurityContext,
}

impl SecurityContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing context, or an empty one.
    pub fn with_base(base: Option<SecurityContext>) -> Self {
        Self {
            security_context: base.unwrap_or_default(),
        }
    }

    pub fn capabilities(&mut self, value: Capabilities) -> &mut Self {
        self.security_context.capabilities = Some(value);
        self
    }

    /// Adds the given Linux capabilities unless capabilities are already configured. An empty list
    /// leaves the context untouched.
    pub fn default_capabilities(&mut self, add: &[String]) -> &mut Self {
        if self.security_context.capabilities.is_none() && !add.is_empty() {
            self.capabilities(Capabilities {
                add: Some(add.to_vec()),
                ..Capabilities::default()
            });
        }
        self
    }

    pub fn privileged(&mut self, value: bool) -> &mut Self {
        self.security_context.privileged = Some(value);
        self
    }

    pub fn default_privileged(&mut self, value: bool) -> &mut Self {
        self.security_context.privileged.get_or_insert(value);
        self
    }

    pub fn run_as_user(&mut self, value: i64) -> &mut Self {
        self.security_context.run_as_user = Some(value);
        self
    }

    pub fn build(&self) -> SecurityContext {
        self.security_context.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_context_builder() {
        let context = SecurityContextBuilder::new()
            .default_capabilities(&["NET_ADMIN".to_owned()])
            .default_privileged(true)
            .run_as_user(VCAP_USER_ID)
            .build();

        assert_eq!(
            context,
            SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["NET_ADMIN".to_owned()]),
                    ..Capabilities::default()
                }),
                privileged: Some(true),
                run_as_user: Some(1000),
                ..SecurityContext::default()
            }
        );
    }

    #[test]
    fn base_context_takes_precedence() {
        let base = SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["SYS_TIME".to_owned()]),
                ..Capabilities::default()
            }),
            privileged: Some(false),
            ..SecurityContext::default()
        };

        let context = SecurityContextBuilder::with_base(Some(base))
            .default_capabilities(&["NET_ADMIN".to_owned()])
            .default_privileged(true)
            .run_as_user(ROOT_USER_ID)
            .build();

        assert_eq!(
            context.capabilities.and_then(|c| c.add),
            Some(vec!["SYS_TIME".to_owned()])
        );
        assert_eq!(context.privileged, Some(false));
        assert_eq!(context.run_as_user, Some(0));
    }

    #[test]
    fn no_capabilities_without_input() {
        let context = SecurityContextBuilder::new().default_capabilities(&[]).build();
        assert_eq!(context.capabilities, None);
    }
}
