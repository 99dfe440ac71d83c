/// Phases of a [`BoshDeployment`](crate::crd::BoshDeployment), stored in `status.state`.
///
/// The stored state is the last phase whose work was done. The reconciler acts on it, then
/// advances it by one phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum DeploymentState {
    Created,
    Updated,
    OpsApplied,
    VariableGenerated,
    VariableInterpolated,
    DataGathered,
    Deploying,
    Deployed,
}

impl DeploymentState {
    /// The phase to act on, given the stored state and the stored and current manifest hashes.
    ///
    /// A deployment without a state was just created. A changed hash restarts the pipeline from
    /// [`Self::Updated`], whatever the stored state is. Unknown states are an error.
    pub fn current(
        stored: Option<&str>,
        stored_sha1: Option<&str>,
        sha1: &str,
    ) -> Result<Self, strum::ParseError> {
        let state = match stored {
            None | Some("") => return Ok(Self::Created),
            Some(state) => state.parse()?,
        };
        if stored_sha1 != Some(sha1) {
            return Ok(Self::Updated);
        }
        Ok(state)
    }

    /// The state stored after the work of `self` is done, [`None`] once deployed.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created | Self::Updated => Some(Self::OpsApplied),
            Self::OpsApplied => Some(Self::VariableGenerated),
            Self::VariableGenerated => Some(Self::VariableInterpolated),
            Self::VariableInterpolated => Some(Self::DataGathered),
            Self::DataGathered => Some(Self::Deploying),
            Self::Deploying => Some(Self::Deployed),
            Self::Deployed => None,
        }
    }
}
