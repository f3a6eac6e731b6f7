use std::collections::HashMap;

use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};

use crate::{
    distance::distance_km,
    grid::GridCell,
    models::{AdjacencyEdge, Waypoint},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdjacencyError {
    #[error("edge references unknown waypoint {0}")]
    MissingWaypoint(i64),
}

/// In-process grid adjacency index.
///
/// Nodes are waypoints, edges are directed `GRID_ADJACENT` relations weighted
/// by [`distance_km`]. Waypoints are also indexed by cell so that neighbour
/// lookups and cell resolution avoid scanning the graph.
///
/// Edge creation is an upsert keyed on `(from, to)`: connecting the same
/// waypoint twice leaves the edge set unchanged.
#[derive(Debug, Clone, Default)]
pub struct GridGraph {
    graph: DiGraph<Waypoint, f64>,
    by_id: HashMap<i64, NodeIndex>,
    /// Per-cell occupants, sorted by waypoint id.
    by_cell: HashMap<GridCell, Vec<NodeIndex>>,
    high_water: i64,
}

/// Edges connecting `waypoint` to every candidate in a Chebyshev-adjacent
/// cell, both directions. Candidates in other cells, and `waypoint` itself,
/// are ignored.
pub fn neighbour_edges<'a>(
    waypoint: &Waypoint,
    candidates: impl IntoIterator<Item = &'a Waypoint>,
) -> Vec<AdjacencyEdge> {
    let mut edges = Vec::new();
    for neighbour in candidates {
        if neighbour.id == waypoint.id || !neighbour.cell.is_adjacent(waypoint.cell) {
            continue;
        }
        let distance_km = distance_km(waypoint.coord, neighbour.coord);
        edges.push(AdjacencyEdge {
            from: waypoint.id,
            to: neighbour.id,
            distance_km,
        });
        edges.push(AdjacencyEdge {
            from: neighbour.id,
            to: waypoint.id,
            distance_km,
        });
    }
    edges
}

impl GridGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from stored waypoint and edge rows.
    pub fn from_records(
        waypoints: impl IntoIterator<Item = Waypoint>,
        edges: &[AdjacencyEdge],
    ) -> Result<Self, AdjacencyError> {
        let mut grid = Self::new();
        grid.extend(waypoints, edges)?;

        tracing::debug!(
            "grid graph rebuilt: {} waypoints, {} edges",
            grid.node_count(),
            grid.edge_count()
        );
        Ok(grid)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn waypoint(&self, id: i64) -> Option<&Waypoint> {
        self.by_id.get(&id).map(|&idx| &self.graph[idx])
    }

    /// Waypoints occupying `cell`, lowest id first.
    pub fn waypoints_at(&self, cell: GridCell) -> impl Iterator<Item = &Waypoint> + '_ {
        self.by_cell
            .get(&cell)
            .into_iter()
            .flatten()
            .map(|&idx| &self.graph[idx])
    }

    /// The waypoint a cell resolves to: the lowest id among its occupants.
    pub fn resolve_cell(&self, cell: GridCell) -> Option<&Waypoint> {
        self.waypoints_at(cell).next()
    }

    pub fn edge_weight(&self, from: i64, to: i64) -> Option<f64> {
        let from = *self.by_id.get(&from)?;
        let to = *self.by_id.get(&to)?;
        self.graph
            .find_edge(from, to)
            .map(|edge| self.graph[edge])
    }

    /// All edges in the index.
    pub fn edges(&self) -> impl Iterator<Item = AdjacencyEdge> + '_ {
        self.graph.edge_references().map(|edge| AdjacencyEdge {
            from: self.graph[edge.source()].id,
            to: self.graph[edge.target()].id,
            distance_km: *edge.weight(),
        })
    }

    /// Compute the edges a newly inserted waypoint needs without touching the
    /// index: both directions to every waypoint in the up to 8 in-range
    /// Chebyshev-neighbour cells.
    pub fn plan_edges(&self, waypoint: &Waypoint) -> Vec<AdjacencyEdge> {
        let candidates = waypoint
            .cell
            .neighbours()
            .flat_map(|cell| self.waypoints_at(cell));
        neighbour_edges(waypoint, candidates)
    }

    /// Highest waypoint id in the index, 0 when empty.
    pub fn high_water(&self) -> i64 {
        self.high_water
    }

    /// Merge rows read from the store. Waypoints already present are kept.
    pub fn extend(
        &mut self,
        waypoints: impl IntoIterator<Item = Waypoint>,
        edges: &[AdjacencyEdge],
    ) -> Result<(), AdjacencyError> {
        for waypoint in waypoints {
            self.add_node(waypoint);
        }
        self.add_edges(edges)
    }

    /// Add `waypoint` (if absent) and upsert `edges`.
    pub fn apply(
        &mut self,
        waypoint: Waypoint,
        edges: &[AdjacencyEdge],
    ) -> Result<(), AdjacencyError> {
        self.add_node(waypoint);
        self.add_edges(edges)
    }

    /// Plan and apply in one step. Returns the edges that were created or
    /// refreshed.
    pub fn insert_waypoint(
        &mut self,
        waypoint: Waypoint,
    ) -> Result<Vec<AdjacencyEdge>, AdjacencyError> {
        let edges = self.plan_edges(&waypoint);
        self.apply(waypoint, &edges)?;
        Ok(edges)
    }

    pub(crate) fn node_index(&self, id: i64) -> Option<NodeIndex> {
        self.by_id.get(&id).copied()
    }

    pub(crate) fn resolve_cell_index(&self, cell: GridCell) -> Option<NodeIndex> {
        self.by_cell.get(&cell)?.first().copied()
    }

    pub(crate) fn node(&self, idx: NodeIndex) -> &Waypoint {
        &self.graph[idx]
    }

    /// Outgoing `(target, weight)` pairs in insertion order.
    pub(crate) fn outgoing(&self, idx: NodeIndex) -> impl Iterator<Item = (NodeIndex, f64)> + '_ {
        self.graph
            .edges(idx)
            .map(|edge| (edge.target(), *edge.weight()))
    }

    fn add_node(&mut self, waypoint: Waypoint) -> NodeIndex {
        if let Some(&idx) = self.by_id.get(&waypoint.id) {
            return idx;
        }
        let id = waypoint.id;
        let cell = waypoint.cell;
        let idx = self.graph.add_node(waypoint);
        self.by_id.insert(id, idx);
        self.high_water = self.high_water.max(id);

        let occupants = self.by_cell.entry(cell).or_default();
        let pos = occupants.partition_point(|&other| self.graph[other].id < id);
        occupants.insert(pos, idx);
        idx
    }

    fn add_edges(&mut self, edges: &[AdjacencyEdge]) -> Result<(), AdjacencyError> {
        for edge in edges {
            let from = self
                .node_index(edge.from)
                .ok_or(AdjacencyError::MissingWaypoint(edge.from))?;
            let to = self
                .node_index(edge.to)
                .ok_or(AdjacencyError::MissingWaypoint(edge.to))?;
            self.graph.update_edge(from, to, edge.distance_km);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use crate::grid::{GridBounds, GridCell};
    use crate::models::{Coordinate, Waypoint, WaypointKind};

    /// Waypoint at `(x, y)` with coordinates from the default mapping.
    pub fn waypoint(id: i64, x: i32, y: i32) -> Waypoint {
        let cell = GridCell::new(x, y).unwrap();
        waypoint_at(id, x, y, GridBounds::default().to_coordinates(cell))
    }

    pub fn waypoint_at(id: i64, x: i32, y: i32, coord: Coordinate) -> Waypoint {
        Waypoint {
            id,
            name: format!("Waypoint_{x}_{y}_{id}"),
            cell: GridCell::new(x, y).unwrap(),
            coord,
            kind: WaypointKind::Viewpoint,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }
}
