/// Failures raised by the substrate.
///
/// Every error is detected eagerly at the call that breaks the contract and
/// aborts that operation; nothing is retried or partially applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The substrate was configured in a way it cannot support.
    #[error("{component}: configuration error: {reason}")]
    Configuration {
        component: &'static str,
        reason: String,
    },
    /// A caller used an API in a pattern that would race or is undefined.
    #[error("{component}: usage pattern error: {reason}")]
    UsagePattern {
        component: &'static str,
        reason: String,
    },
    /// Internal tables disagree with each other. Never user-triggerable.
    #[error("{component}: construction invariant violated: {reason}")]
    ConstructionInvariant {
        component: &'static str,
        reason: String,
    },
}

impl Error {
    pub fn configuration(component: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            component,
            reason: reason.into(),
        }
    }

    pub fn usage_pattern(component: &'static str, reason: impl Into<String>) -> Self {
        Self::UsagePattern {
            component,
            reason: reason.into(),
        }
    }

    pub fn construction_invariant(component: &'static str, reason: impl Into<String>) -> Self {
        Self::ConstructionInvariant {
            component,
            reason: reason.into(),
        }
    }

    /// Name of the component that raised the error.
    pub fn component(&self) -> &'static str {
        match self {
            Self::Configuration { component, .. }
            | Self::UsagePattern { component, .. }
            | Self::ConstructionInvariant { component, .. } => component,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
