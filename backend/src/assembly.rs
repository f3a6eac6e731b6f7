use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    distance::path_distance_km,
    models::{CreateRouteRequest, Difficulty, Waypoint},
};

/// Fewest waypoints a route may have.
pub const MIN_ROUTE_WAYPOINTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("route must have at least 2 waypoints, got {0}")]
    TooFewWaypoints(usize),
    #[error("route name must not be empty")]
    EmptyName,
    #[error("waypoint {0} not found")]
    UnknownWaypoint(i64),
}

/// A manually assembled route, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub name: String,
    pub difficulty: Difficulty,
    pub distance_km: f64,
    /// Sequence index is the position in this list.
    pub waypoint_ids: Vec<i64>,
}

impl PlannedRoute {
    /// `(start, end)` waypoint ids, `None` for an empty route.
    pub fn endpoints(&self) -> Option<(i64, i64)> {
        Some((*self.waypoint_ids.first()?, *self.waypoint_ids.last()?))
    }

    /// `(sequence_order, waypoint_id)` membership rows.
    pub fn memberships(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.waypoint_ids
            .iter()
            .enumerate()
            .map(|(seq, &id)| (seq as i32, id))
    }
}

/// Cheap checks that need no store access.
pub fn validate(request: &CreateRouteRequest) -> Result<(), AssemblyError> {
    if request.name.trim().is_empty() {
        return Err(AssemblyError::EmptyName);
    }
    if request.waypoint_ids.len() < MIN_ROUTE_WAYPOINTS {
        return Err(AssemblyError::TooFewWaypoints(request.waypoint_ids.len()));
    }
    Ok(())
}

/// Assemble a route over the caller's literal waypoint order.
///
/// `waypoints` holds the stored records for the requested ids in any order.
/// Consecutive waypoints do not need to be grid neighbours and the adjacency
/// graph is not consulted: the distance is the sum of the pairwise distances
/// in the order given. An id may appear more than once (out-and-back routes).
pub fn assemble(
    request: &CreateRouteRequest,
    waypoints: &[Waypoint],
) -> Result<PlannedRoute, AssemblyError> {
    validate(request)?;

    let by_id: HashMap<i64, &Waypoint> = waypoints.iter().map(|w| (w.id, w)).collect();
    let coords = request
        .waypoint_ids
        .iter()
        .map(|id| {
            by_id
                .get(id)
                .map(|w| w.coord)
                .ok_or(AssemblyError::UnknownWaypoint(*id))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PlannedRoute {
        name: request.name.trim().to_string(),
        difficulty: request.difficulty,
        distance_km: path_distance_km(&coords),
        waypoint_ids: request.waypoint_ids.clone(),
    })
}
