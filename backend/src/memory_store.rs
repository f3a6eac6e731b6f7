use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    adjacency::neighbour_edges,
    assembly::PlannedRoute,
    models::{AdjacencyEdge, NewWaypoint, RouteFilter, RouteRecord, Waypoint, WaypointFilter},
    store::{StoreError, TouringStore},
};

/// Process-local [`TouringStore`].
///
/// Every operation runs under one lock, so a waypoint is connected to the
/// neighbours present at insert time and published together with its edges
/// exactly like a committed transaction. `set_unavailable`
/// makes every call fail, which lets callers exercise outage handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    waypoints: BTreeMap<i64, Waypoint>,
    edges: BTreeMap<(i64, i64), f64>,
    routes: BTreeMap<i64, RouteRecord>,
    last_waypoint_id: i64,
    last_route_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store is switched off".to_string(),
            ));
        }
        Ok(())
    }
}

impl TouringStore for MemoryStore {
    async fn create_waypoint(
        &self,
        waypoint: &NewWaypoint,
    ) -> Result<(Waypoint, Vec<AdjacencyEdge>), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let stored = Waypoint {
            id: state.last_waypoint_id + 1,
            name: waypoint.name.clone(),
            cell: waypoint.cell,
            coord: waypoint.coord,
            kind: waypoint.kind,
            created_at: Utc::now(),
        };
        let edges = neighbour_edges(&stored, state.waypoints.values());

        state.last_waypoint_id = stored.id;
        state.waypoints.insert(stored.id, stored.clone());
        for edge in &edges {
            state
                .edges
                .entry((edge.from, edge.to))
                .or_insert(edge.distance_km);
        }
        Ok((stored, edges))
    }

    async fn get_waypoint(&self, id: i64) -> Result<Waypoint, StoreError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .waypoints
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "waypoint",
                id,
            })
    }

    async fn waypoints_by_ids(&self, ids: &[i64]) -> Result<Vec<Waypoint>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut found: Vec<Waypoint> = ids
            .iter()
            .filter_map(|id| state.waypoints.get(id).cloned())
            .collect();
        found.sort_by_key(|w| w.id);
        found.dedup_by_key(|w| w.id);
        Ok(found)
    }

    async fn list_waypoints(&self, filter: WaypointFilter) -> Result<Vec<Waypoint>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .waypoints
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect())
    }

    async fn list_adjacency(&self) -> Result<Vec<AdjacencyEdge>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .map(|(&(from, to), &distance_km)| AdjacencyEdge {
                from,
                to,
                distance_km,
            })
            .collect())
    }

    async fn changes_since(
        &self,
        after_id: i64,
    ) -> Result<(Vec<Waypoint>, Vec<AdjacencyEdge>), StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;

        let waypoints: Vec<Waypoint> = state
            .waypoints
            .range(after_id + 1..)
            .map(|(_, w)| w.clone())
            .collect();
        let edges = state
            .edges
            .iter()
            .filter(|(&(from, to), _)| from > after_id || to > after_id)
            .map(|(&(from, to), &distance_km)| AdjacencyEdge {
                from,
                to,
                distance_km,
            })
            .collect();
        Ok((waypoints, edges))
    }

    async fn create_route(&self, route: &PlannedRoute) -> Result<RouteRecord, StoreError> {
        self.check_available()?;
        let (start_waypoint_id, end_waypoint_id) = route
            .endpoints()
            .ok_or_else(|| StoreError::InvalidData("route has no waypoints".to_string()))?;
        let mut state = self.state.lock().await;

        if state.routes.values().any(|r| r.name == route.name) {
            return Err(StoreError::Duplicate(format!("route '{}'", route.name)));
        }
        if let Some(&id) = route
            .waypoint_ids
            .iter()
            .find(|id| !state.waypoints.contains_key(id))
        {
            return Err(StoreError::NotFound {
                entity: "waypoint",
                id,
            });
        }

        let record = RouteRecord {
            id: state.last_route_id + 1,
            name: route.name.clone(),
            difficulty: route.difficulty,
            distance_km: route.distance_km,
            start_waypoint_id,
            end_waypoint_id,
            waypoint_ids: route.waypoint_ids.clone(),
            created_at: Utc::now(),
        };
        state.last_route_id = record.id;
        state.routes.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_route(&self, id: i64) -> Result<RouteRecord, StoreError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .routes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "route", id })
    }

    async fn list_routes(&self, filter: RouteFilter) -> Result<Vec<RouteRecord>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .routes
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridBounds, GridCell};
    use crate::models::{Difficulty, WaypointKind};

    fn new_waypoint(x: i32, y: i32) -> NewWaypoint {
        let cell = GridCell::new(x, y).unwrap();
        NewWaypoint {
            name: format!("wp {x}/{y}"),
            cell,
            coord: GridBounds::default().to_coordinates(cell),
            kind: WaypointKind::Cafe,
        }
    }

    #[tokio::test]
    async fn assigns_increasing_ids() {
        let store = MemoryStore::new();
        let (a, _) = store.create_waypoint(&new_waypoint(0, 0)).await.unwrap();
        let (b, _) = store.create_waypoint(&new_waypoint(5, 5)).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(store.get_waypoint(2).await.unwrap().cell, GridCell::new(5, 5).unwrap());
    }

    #[tokio::test]
    async fn connects_to_stored_neighbours() {
        let store = MemoryStore::new();
        store.create_waypoint(&new_waypoint(50, 50)).await.unwrap();
        store.create_waypoint(&new_waypoint(60, 60)).await.unwrap();
        let (_, edges) = store.create_waypoint(&new_waypoint(51, 50)).await.unwrap();

        let pairs: Vec<_> = edges.iter().map(|e| (e.from, e.to)).collect();
        assert_eq!(pairs, vec![(3, 1), (1, 3)]);
        assert_eq!(store.list_adjacency().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn changes_since_returns_newer_rows_and_their_edges() {
        let store = MemoryStore::new();
        for (x, y) in [(0, 0), (1, 0), (1, 1), (30, 30)] {
            store.create_waypoint(&new_waypoint(x, y)).await.unwrap();
        }

        let (waypoints, edges) = store.changes_since(2).await.unwrap();
        let ids: Vec<_> = waypoints.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![3, 4]);
        // waypoint 3 touches 1 and 2; 4 is isolated
        assert_eq!(edges.len(), 4);
        assert!(edges.iter().all(|e| e.from == 3 || e.to == 3));

        let (all, all_edges) = store.changes_since(0).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all_edges.len(), 6);
    }

    #[tokio::test]
    async fn empty_route_is_rejected() {
        let store = MemoryStore::new();
        let empty = PlannedRoute {
            name: "Nothing".to_string(),
            difficulty: Difficulty::Easy,
            distance_km: 0.0,
            waypoint_ids: Vec::new(),
        };
        assert!(matches!(
            store.create_route(&empty).await,
            Err(StoreError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn rejects_duplicate_route_names() {
        let store = MemoryStore::new();
        store.create_waypoint(&new_waypoint(0, 0)).await.unwrap();
        store.create_waypoint(&new_waypoint(9, 9)).await.unwrap();
        let planned = PlannedRoute {
            name: "Loop".to_string(),
            difficulty: Difficulty::Easy,
            distance_km: 10.0,
            waypoint_ids: vec![1, 2],
        };
        store.create_route(&planned).await.unwrap();
        assert!(matches!(
            store.create_route(&planned).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_waypoint(1).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(matches!(
            store.get_waypoint(1).await,
            Err(StoreError::NotFound { entity: "waypoint", id: 1 })
        ));
    }
}
