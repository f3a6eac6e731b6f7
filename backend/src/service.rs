use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::{
    adjacency::GridGraph,
    assembly,
    config::AppConfig,
    discovery::{DiscoveredRoute, DiscoveryEngine, DEFAULT_HOP_LIMIT},
    error::TouringError,
    grid::{GridBounds, GridCell},
    models::{
        Coordinate, CreateRouteRequest, CreateWaypointRequest, DiscoverRouteRequest, NewWaypoint,
        RouteDetail, RouteDiscoverResponse, RouteFilter, RouteRecord, Waypoint, WaypointFilter,
    },
    store::TouringStore,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceConfig {
    pub bounds: GridBounds,
    pub max_hops: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bounds: GridBounds::default(),
            max_hops: DEFAULT_HOP_LIMIT,
        }
    }
}

impl From<&AppConfig> for ServiceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            bounds: config.bounds,
            max_hops: config.max_hops,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub waypoints: usize,
    pub edges: usize,
}

/// Touring operations over a store and the in-process adjacency index.
///
/// The store owns the adjacency rows: each insert plans its edges from the
/// stored neighbours inside its own write unit. The index is a read model
/// that catches up by pulling every row above its high-water id, so several
/// services over one store converge on the same graph.
pub struct TouringService<S> {
    store: S,
    graph: RwLock<GridGraph>,
    engine: DiscoveryEngine,
    bounds: GridBounds,
}

impl<S: TouringStore> TouringService<S> {
    /// Load the adjacency index from `store`.
    pub async fn open(store: S, config: ServiceConfig) -> Result<Self, TouringError> {
        let (waypoints, edges) = store.changes_since(0).await?;
        let graph = GridGraph::from_records(waypoints, &edges)?;

        tracing::info!(
            "adjacency index loaded: {} waypoints, {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self {
            store,
            graph: RwLock::new(graph),
            engine: DiscoveryEngine::new(config.max_hops),
            bounds: config.bounds,
        })
    }

    /// Pull waypoints and edges committed since the index was last synced.
    /// Returns the number of new waypoints.
    pub async fn refresh(&self) -> Result<usize, TouringError> {
        let high_water = self.graph.read().await.high_water();
        let (waypoints, edges) = self.store.changes_since(high_water).await?;
        if waypoints.is_empty() {
            return Ok(0);
        }

        let count = waypoints.len();
        self.graph.write().await.extend(waypoints, &edges)?;
        tracing::debug!("adjacency index synced {} waypoints past id {}", count, high_water);
        Ok(count)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    pub async fn graph_stats(&self) -> GraphStats {
        let graph = self.graph.read().await;
        GraphStats {
            waypoints: graph.node_count(),
            edges: graph.edge_count(),
        }
    }

    /// Persist a waypoint and connect it to every waypoint in the neighbouring
    /// cells.
    pub async fn create_waypoint(
        &self,
        request: CreateWaypointRequest,
    ) -> Result<Waypoint, TouringError> {
        let new = self.prepare_waypoint(request)?;

        let (stored, edges) = self.store.create_waypoint(&new).await?;

        tracing::info!(
            "waypoint {} created at {} with {} adjacency edges",
            stored.id,
            stored.cell,
            edges.len()
        );
        // The row is committed; a lagging index is caught up on the next sync.
        if let Err(err) = self.refresh().await {
            tracing::warn!("adjacency index not synced after waypoint {}: {}", stored.id, err);
        }
        Ok(stored)
    }

    fn prepare_waypoint(&self, request: CreateWaypointRequest) -> Result<NewWaypoint, TouringError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(TouringError::Validation(
                "waypoint name must not be empty".to_string(),
            ));
        }
        let cell = GridCell::new(request.grid_x, request.grid_y)?;

        let coord = match (request.lat, request.lng) {
            (Some(lat), Some(lng)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                    return Err(TouringError::Validation(format!(
                        "coordinate ({lat}, {lng}) is outside the globe"
                    )));
                }
                Coordinate { lat, lng }
            }
            _ => self.bounds.to_coordinates(cell),
        };

        Ok(NewWaypoint {
            name: name.to_string(),
            cell,
            coord,
            kind: request.kind,
        })
    }

    pub async fn get_waypoint(&self, id: i64) -> Result<Waypoint, TouringError> {
        Ok(self.store.get_waypoint(id).await?)
    }

    pub async fn list_waypoints(
        &self,
        filter: WaypointFilter,
    ) -> Result<Vec<Waypoint>, TouringError> {
        Ok(self.store.list_waypoints(filter).await?)
    }

    /// Shortest path between two cells, with the exact distance.
    pub async fn discover(
        &self,
        start: GridCell,
        end: GridCell,
        max_hops: u32,
    ) -> Result<DiscoveredRoute, TouringError> {
        if let Err(err) = self.refresh().await {
            tracing::warn!("discovering on a stale adjacency index: {}", err);
        }
        let graph = self.graph.read().await;
        Ok(self.engine.discover(&graph, start, end, max_hops)?)
    }

    pub async fn discover_route(
        &self,
        request: &DiscoverRouteRequest,
    ) -> Result<RouteDiscoverResponse, TouringError> {
        let start = GridCell::from_pair(request.start_grid)?;
        let end = GridCell::from_pair(request.end_grid)?;
        let route = self.discover(start, end, request.max_hops).await?;
        Ok(route.to_response())
    }

    /// Assemble a route over the given waypoint order and persist it.
    pub async fn create_route(
        &self,
        request: CreateRouteRequest,
    ) -> Result<RouteRecord, TouringError> {
        assembly::validate(&request)?;
        let waypoints = self.store.waypoints_by_ids(&request.waypoint_ids).await?;
        let planned = assembly::assemble(&request, &waypoints)?;
        let record = self.store.create_route(&planned).await?;

        tracing::info!(
            "route {} '{}' created: {} waypoints, {:.2} km",
            record.id,
            record.name,
            record.waypoint_ids.len(),
            record.distance_km
        );
        Ok(record)
    }

    /// A route with its waypoints in sequence order.
    pub async fn get_route(&self, id: i64) -> Result<RouteDetail, TouringError> {
        let route = self.store.get_route(id).await?;
        let by_id: HashMap<i64, Waypoint> = self
            .store
            .waypoints_by_ids(&route.waypoint_ids)
            .await?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        let waypoints = route
            .waypoint_ids
            .iter()
            .map(|id| {
                by_id
                    .get(id)
                    .map(Waypoint::to_route_entry)
                    .ok_or_else(|| TouringError::NotFound(format!("waypoint {id} not found")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RouteDetail { route, waypoints })
    }

    pub async fn list_routes(&self, filter: RouteFilter) -> Result<Vec<RouteRecord>, TouringError> {
        Ok(self.store.list_routes(filter).await?)
    }
}
