use thiserror::Error;

use crate::{
    adjacency::AdjacencyError, assembly::AssemblyError, discovery::DiscoveryError,
    grid::GridError, store::StoreError,
};

/// Caller-facing error of every touring operation.
#[derive(Debug, Error)]
pub enum TouringError {
    #[error(transparent)]
    InvalidGridCoordinate(#[from] GridError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(StoreError),
    #[error("adjacency index is inconsistent: {0}")]
    Graph(#[from] AdjacencyError),
}

impl TouringError {
    /// Body for an error response.
    pub fn to_api_error(&self) -> shared::ApiError {
        shared::ApiError {
            message: self.to_string(),
        }
    }
}

impl From<StoreError> for TouringError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => TouringError::NotFound(err.to_string()),
            StoreError::Duplicate(what) => TouringError::Duplicate(what),
            StoreError::InvalidData(what) => TouringError::Validation(what),
            other => TouringError::StoreUnavailable(other),
        }
    }
}

impl From<DiscoveryError> for TouringError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::HopLimitExceeded { .. } => TouringError::Validation(err.to_string()),
            DiscoveryError::NoWaypointAtCell(_) | DiscoveryError::NoPath { .. } => {
                TouringError::NotFound(err.to_string())
            }
        }
    }
}

impl From<AssemblyError> for TouringError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::UnknownWaypoint(_) => TouringError::NotFound(err.to_string()),
            AssemblyError::TooFewWaypoints(_) | AssemblyError::EmptyName => {
                TouringError::Validation(err.to_string())
            }
        }
    }
}
