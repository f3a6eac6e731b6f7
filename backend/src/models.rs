use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grid::GridCell;

pub use shared::{
    Coordinate, CreateRouteRequest, CreateWaypointRequest, Difficulty, DiscoverRouteRequest,
    RouteDiscoverResponse, WaypointInRoute, WaypointKind,
};

/// A stored waypoint. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: i64,
    pub name: String,
    pub cell: GridCell,
    pub coord: Coordinate,
    pub kind: WaypointKind,
    pub created_at: DateTime<Utc>,
}

impl Waypoint {
    pub fn to_route_entry(&self) -> WaypointInRoute {
        WaypointInRoute {
            id: self.id,
            name: self.name.clone(),
            grid: self.cell.as_pair(),
            lat: self.coord.lat,
            lng: self.coord.lng,
        }
    }
}

/// Validated waypoint waiting for an id from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWaypoint {
    pub name: String,
    pub cell: GridCell,
    pub coord: Coordinate,
    pub kind: WaypointKind,
}

/// Directed grid-adjacency edge between two waypoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub from: i64,
    pub to: i64,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub id: i64,
    pub name: String,
    pub difficulty: Difficulty,
    pub distance_km: f64,
    pub start_waypoint_id: i64,
    pub end_waypoint_id: i64,
    /// Member waypoints ordered by sequence index.
    pub waypoint_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// A route together with its member waypoints in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDetail {
    #[serde(flatten)]
    pub route: RouteRecord,
    pub waypoints: Vec<WaypointInRoute>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaypointFilter {
    pub grid_x: Option<u8>,
    pub grid_y: Option<u8>,
}

impl WaypointFilter {
    pub fn matches(&self, waypoint: &Waypoint) -> bool {
        self.grid_x.is_none_or(|x| waypoint.cell.x() == x)
            && self.grid_y.is_none_or(|y| waypoint.cell.y() == y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteFilter {
    pub difficulty: Option<Difficulty>,
    pub min_distance_km: Option<f64>,
    pub max_distance_km: Option<f64>,
}

impl RouteFilter {
    pub fn matches(&self, route: &RouteRecord) -> bool {
        self.difficulty.is_none_or(|d| route.difficulty == d)
            && self.min_distance_km.is_none_or(|min| route.distance_km >= min)
            && self.max_distance_km.is_none_or(|max| route.distance_km <= max)
    }
}
