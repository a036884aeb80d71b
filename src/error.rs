use thiserror::Error;

use crate::map_link::MapLinkId;

/// Broad outcome classes, so batch callers can count and skip per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The sample can not produce a route; skip it.
    InputRejection,
    /// A single link was dropped while building the graph.
    ConstructionWarning,
    /// A construction bug. Never swallow these.
    Integrity,
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("ground truth is {length:.2} m long, at least {horizon:.2} m required")]
    GroundTruthTooShort { length: f64, horizon: f64 },

    #[error("no start node found after {iterations} search radius expansions (last radius {radius:.1} m)")]
    NoStartNode { iterations: usize, radius: f64 },

    #[error("no candidate route reaches the {horizon:.1} m horizon")]
    NoRoutes { horizon: f64 },

    #[error("link {0} could not be resolved to geometry")]
    UnresolvedLink(MapLinkId),

    #[error("route graph integrity violated: {0}")]
    Integrity(String),
}

impl RouteError {
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::GroundTruthTooShort { .. } | Self::NoStartNode { .. } | Self::NoRoutes { .. } => {
                ErrorCategory::InputRejection
            }
            Self::UnresolvedLink(_) => ErrorCategory::ConstructionWarning,
            Self::Integrity(_) => ErrorCategory::Integrity,
        }
    }
}
