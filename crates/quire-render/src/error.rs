/// Failures surfaced by [`crate::RenderPipeline::render`].
///
/// Callers tell "the converter is not installed" (a deployment problem, not
/// worth retrying) apart from "this particular artifact could not be produced".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("missing dependency `{dependency}`: {reason}")]
    MissingDependency { dependency: String, reason: String },

    #[error("artifact generation failed: {message}")]
    Generation { message: String },
}

impl RenderError {
    pub fn missing_dependency(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingDependency {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// `true` when the failure is a service-unavailable condition rather than a
    /// failure of this particular request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::MissingDependency { .. })
    }

    /// A generic message suitable for end users. Never includes paths, command
    /// lines or converter output.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingDependency { .. } => {
                "Document export is temporarily unavailable. Please try again later."
            }
            Self::Generation { .. } => "The document could not be generated.",
        }
    }
}
