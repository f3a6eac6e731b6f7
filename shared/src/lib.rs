use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// Category tag of a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    Viewpoint,
    Cafe,
    RestArea,
    FuelStation,
}

impl WaypointKind {
    pub const ALL: [WaypointKind; 4] = [
        WaypointKind::Viewpoint,
        WaypointKind::Cafe,
        WaypointKind::RestArea,
        WaypointKind::FuelStation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WaypointKind::Viewpoint => "viewpoint",
            WaypointKind::Cafe => "cafe",
            WaypointKind::RestArea => "rest_area",
            WaypointKind::FuelStation => "fuel_station",
        }
    }
}

impl fmt::Display for WaypointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaypointKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WaypointKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Ordinal difficulty rating of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Moderate,
    Hard,
    Extreme,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Easy,
        Difficulty::Moderate,
        Difficulty::Hard,
        Difficulty::Extreme,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Moderate => "moderate",
            Difficulty::Hard => "hard",
            Difficulty::Extreme => "extreme",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Difficulty::ALL
            .into_iter()
            .find(|difficulty| difficulty.as_str() == lower)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant `{0}`")]
pub struct UnknownVariant(pub String);

/// Waypoint creation payload. `lat`/`lng` are derived from the grid cell when
/// either one is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWaypointRequest {
    pub name: String,
    pub grid_x: i32,
    pub grid_y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(rename = "type")]
    pub kind: WaypointKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverRouteRequest {
    pub start_grid: [i32; 2],
    pub end_grid: [i32; 2],
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointInRoute {
    pub id: i64,
    pub name: String,
    pub grid: [u8; 2],
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDiscoverResponse {
    pub waypoints: Vec<WaypointInRoute>,
    pub total_distance_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRouteRequest {
    pub name: String,
    pub difficulty: Difficulty,
    pub waypoint_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

pub fn default_max_hops() -> u32 {
    10
}
