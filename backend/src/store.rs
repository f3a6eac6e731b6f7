use std::sync::Arc;

use crate::{
    assembly::PlannedRoute,
    models::{AdjacencyEdge, NewWaypoint, RouteFilter, RouteRecord, Waypoint, WaypointFilter},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence seam of the touring core.
///
/// Implementations:
/// - `Database`: PostgreSQL through a bounded sqlx pool (production)
/// - `MemoryStore`: process-local maps (tests, dry runs)
///
/// # Contract
/// - `create_waypoint` assigns the id, connects the waypoint to every stored
///   waypoint in the Chebyshev-adjacent cells (both directions) and persists
///   the edges in the same unit of work. Neighbours are read from the store
///   itself under a write lock held until commit, so concurrent writers never
///   miss each other. Either the waypoint and all of its edges become visible
///   or nothing does.
/// - Waypoint inserts commit in id order, so every edge touching a waypoint
///   newer than id `n` has an endpoint above `n`.
/// - Edge persistence is an upsert keyed on `(from, to)`.
/// - `create_route` writes the route and its membership rows atomically and
///   rejects a duplicate name with [`StoreError::Duplicate`].
#[allow(async_fn_in_trait)]
pub trait TouringStore: Send + Sync {
    async fn create_waypoint(
        &self,
        waypoint: &NewWaypoint,
    ) -> Result<(Waypoint, Vec<AdjacencyEdge>), StoreError>;

    async fn get_waypoint(&self, id: i64) -> Result<Waypoint, StoreError>;

    /// Stored records for the ids that exist, in no particular order.
    async fn waypoints_by_ids(&self, ids: &[i64]) -> Result<Vec<Waypoint>, StoreError>;

    /// Matching waypoints ordered by id.
    async fn list_waypoints(&self, filter: WaypointFilter) -> Result<Vec<Waypoint>, StoreError>;

    async fn list_adjacency(&self) -> Result<Vec<AdjacencyEdge>, StoreError>;

    /// Waypoints with an id above `after_id` (ordered by id) and every edge
    /// touching them. Edges only reference waypoints that are returned or
    /// have an id of at most `after_id`.
    async fn changes_since(
        &self,
        after_id: i64,
    ) -> Result<(Vec<Waypoint>, Vec<AdjacencyEdge>), StoreError>;

    async fn create_route(&self, route: &PlannedRoute) -> Result<RouteRecord, StoreError>;

    async fn get_route(&self, id: i64) -> Result<RouteRecord, StoreError>;

    /// Matching routes ordered by id.
    async fn list_routes(&self, filter: RouteFilter) -> Result<Vec<RouteRecord>, StoreError>;
}

/// One store shared by several services.
impl<S: TouringStore> TouringStore for Arc<S> {
    async fn create_waypoint(
        &self,
        waypoint: &NewWaypoint,
    ) -> Result<(Waypoint, Vec<AdjacencyEdge>), StoreError> {
        (**self).create_waypoint(waypoint).await
    }

    async fn get_waypoint(&self, id: i64) -> Result<Waypoint, StoreError> {
        (**self).get_waypoint(id).await
    }

    async fn waypoints_by_ids(&self, ids: &[i64]) -> Result<Vec<Waypoint>, StoreError> {
        (**self).waypoints_by_ids(ids).await
    }

    async fn list_waypoints(&self, filter: WaypointFilter) -> Result<Vec<Waypoint>, StoreError> {
        (**self).list_waypoints(filter).await
    }

    async fn list_adjacency(&self) -> Result<Vec<AdjacencyEdge>, StoreError> {
        (**self).list_adjacency().await
    }

    async fn changes_since(
        &self,
        after_id: i64,
    ) -> Result<(Vec<Waypoint>, Vec<AdjacencyEdge>), StoreError> {
        (**self).changes_since(after_id).await
    }

    async fn create_route(&self, route: &PlannedRoute) -> Result<RouteRecord, StoreError> {
        (**self).create_route(route).await
    }

    async fn get_route(&self, id: i64) -> Result<RouteRecord, StoreError> {
        (**self).get_route(id).await
    }

    async fn list_routes(&self, filter: RouteFilter) -> Result<Vec<RouteRecord>, StoreError> {
        (**self).list_routes(filter).await
    }
}
