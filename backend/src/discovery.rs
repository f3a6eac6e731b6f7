use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use petgraph::graph::NodeIndex;

use crate::{
    adjacency::GridGraph,
    distance::round_km,
    grid::GridCell,
    models::{RouteDiscoverResponse, Waypoint},
};

/// Upper bound on `max_hops` accepted by default.
pub const DEFAULT_HOP_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no waypoint at grid cell {0}")]
    NoWaypointAtCell(GridCell),
    #[error("no path found from {start} to {end} within {max_hops} hops")]
    NoPath {
        start: GridCell,
        end: GridCell,
        max_hops: u32,
    },
    #[error("max_hops {requested} exceeds the limit of {limit}")]
    HopLimitExceeded { requested: u32, limit: u32 },
}

/// Result of a successful discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredRoute {
    /// Start to end inclusive.
    pub waypoints: Vec<Waypoint>,
    /// Unrounded sum of the traversed edge weights.
    pub distance_km: f64,
}

impl DiscoveredRoute {
    pub fn hops(&self) -> usize {
        self.waypoints.len().saturating_sub(1)
    }

    pub fn to_response(&self) -> RouteDiscoverResponse {
        RouteDiscoverResponse {
            waypoints: self.waypoints.iter().map(Waypoint::to_route_entry).collect(),
            total_distance_km: round_km(self.distance_km),
        }
    }
}

/// Hop-bounded shortest-path search over a [`GridGraph`].
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryEngine {
    hop_limit: u32,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new(DEFAULT_HOP_LIMIT)
    }
}

impl DiscoveryEngine {
    pub fn new(hop_limit: u32) -> Self {
        Self { hop_limit }
    }

    pub fn hop_limit(&self) -> u32 {
        self.hop_limit
    }

    /// Find the minimum-weight path from the waypoint at `start` to the one at
    /// `end` using at most `max_hops` edges.
    ///
    /// # Algorithm
    ///
    /// Dijkstra over `(waypoint, hops used)` states. A waypoint settled at `h`
    /// hops dominates every later state of that waypoint with `>= h` hops (the
    /// later one can only cost more), so those are skipped; states with fewer
    /// hops stay alive because they may still reach the goal inside the bound.
    ///
    /// # Ties
    ///
    /// The queue pops lowest weight first, then fewer hops, then lower
    /// waypoint id. A state's predecessor is only replaced by a strictly
    /// cheaper one, so among equal-weight paths the first one found in edge
    /// insertion order wins.
    ///
    /// A cell holding several waypoints resolves to the lowest id.
    pub fn discover(
        &self,
        graph: &GridGraph,
        start: GridCell,
        end: GridCell,
        max_hops: u32,
    ) -> Result<DiscoveredRoute, DiscoveryError> {
        if max_hops > self.hop_limit {
            return Err(DiscoveryError::HopLimitExceeded {
                requested: max_hops,
                limit: self.hop_limit,
            });
        }

        let source = graph
            .resolve_cell_index(start)
            .ok_or(DiscoveryError::NoWaypointAtCell(start))?;
        let target = graph
            .resolve_cell_index(end)
            .ok_or(DiscoveryError::NoWaypointAtCell(end))?;

        let route = shortest_path(graph, source, target, max_hops).ok_or(DiscoveryError::NoPath {
            start,
            end,
            max_hops,
        })?;

        tracing::debug!(
            "discovered {} -> {}: {} hops, {:.2} km",
            start,
            end,
            route.hops(),
            route.distance_km
        );
        Ok(route)
    }
}

#[derive(Debug, Clone, Copy)]
struct State {
    cost: f64,
    hops: u32,
    node: NodeIndex,
    id: i64,
}

// Reversed so the max-heap pops the cheapest state first.
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

type StateKey = (NodeIndex, u32);

fn shortest_path(
    graph: &GridGraph,
    source: NodeIndex,
    target: NodeIndex,
    max_hops: u32,
) -> Option<DiscoveredRoute> {
    let mut heap = BinaryHeap::new();
    let mut best: HashMap<StateKey, f64> = HashMap::new();
    let mut parent: HashMap<StateKey, StateKey> = HashMap::new();
    // Fewest hops at which each waypoint has been settled.
    let mut settled: HashMap<NodeIndex, u32> = HashMap::new();

    best.insert((source, 0), 0.0);
    heap.push(State {
        cost: 0.0,
        hops: 0,
        node: source,
        id: graph.node(source).id,
    });

    while let Some(State {
        cost, hops, node, ..
    }) = heap.pop()
    {
        if best.get(&(node, hops)).is_some_and(|&known| cost > known) {
            continue;
        }
        if settled.get(&node).is_some_and(|&at| at <= hops) {
            continue;
        }
        settled.insert(node, hops);

        if node == target {
            return Some(rebuild(graph, &parent, (node, hops), cost));
        }
        if hops >= max_hops {
            continue;
        }

        let next_hops = hops + 1;
        for (next, weight) in graph.outgoing(node) {
            if settled.get(&next).is_some_and(|&at| at <= next_hops) {
                continue;
            }
            let next_cost = cost + weight;
            let key = (next, next_hops);
            if best.get(&key).is_none_or(|&known| next_cost < known) {
                best.insert(key, next_cost);
                parent.insert(key, (node, hops));
                heap.push(State {
                    cost: next_cost,
                    hops: next_hops,
                    node: next,
                    id: graph.node(next).id,
                });
            }
        }
    }

    None
}

fn rebuild(
    graph: &GridGraph,
    parent: &HashMap<StateKey, StateKey>,
    goal: StateKey,
    distance_km: f64,
) -> DiscoveredRoute {
    let mut states = vec![goal];
    let mut current = goal;
    while let Some(&previous) = parent.get(&current) {
        states.push(previous);
        current = previous;
    }
    states.reverse();

    DiscoveredRoute {
        waypoints: states
            .into_iter()
            .map(|(idx, _)| graph.node(idx).clone())
            .collect(),
        distance_km,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::test_support::{waypoint, waypoint_at};
    use crate::distance::distance_km;
    use crate::models::Coordinate;

    fn cell(x: i32, y: i32) -> GridCell {
        GridCell::new(x, y).unwrap()
    }

    fn grid_of(points: &[(i64, i32, i32)]) -> GridGraph {
        let mut grid = GridGraph::new();
        for &(id, x, y) in points {
            grid.insert_waypoint(waypoint(id, x, y)).unwrap();
        }
        grid
    }

    fn ids(route: &DiscoveredRoute) -> Vec<i64> {
        route.waypoints.iter().map(|w| w.id).collect()
    }

    #[test]
    fn same_cell_returns_single_waypoint() {
        let grid = grid_of(&[(1, 4, 4), (2, 5, 4)]);
        let route = DiscoveryEngine::default()
            .discover(&grid, cell(4, 4), cell(4, 4), 3)
            .unwrap();

        assert_eq!(ids(&route), vec![1]);
        assert_eq!(route.distance_km, 0.0);
        assert_eq!(route.to_response().total_distance_km, 0.0);
    }

    #[test]
    fn same_cell_works_with_zero_hops() {
        let grid = grid_of(&[(1, 4, 4)]);
        let route = DiscoveryEngine::default()
            .discover(&grid, cell(4, 4), cell(4, 4), 0)
            .unwrap();
        assert_eq!(route.hops(), 0);
    }

    #[test]
    fn takes_direct_diagonal_edge() {
        let grid = grid_of(&[(1, 0, 0), (2, 1, 0), (3, 1, 1)]);
        let route = DiscoveryEngine::default()
            .discover(&grid, cell(0, 0), cell(1, 1), 2)
            .unwrap();

        assert_eq!(ids(&route), vec![1, 3]);
        let expected = distance_km(waypoint(1, 0, 0).coord, waypoint(3, 1, 1).coord);
        assert!((route.distance_km - expected).abs() < 1e-9);
    }

    #[test]
    fn disconnected_cells_are_not_found() {
        let grid = grid_of(&[(1, 0, 0), (2, 1, 0), (3, 10, 10)]);
        let err = DiscoveryEngine::default()
            .discover(&grid, cell(0, 0), cell(10, 10), 20)
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoPath { max_hops: 20, .. }));
    }

    #[test]
    fn path_longer_than_hop_bound_is_not_found() {
        let grid = grid_of(&[(1, 0, 0), (2, 1, 0), (3, 2, 0), (4, 3, 0)]);
        let engine = DiscoveryEngine::default();

        assert!(matches!(
            engine.discover(&grid, cell(0, 0), cell(3, 0), 2),
            Err(DiscoveryError::NoPath { .. })
        ));
        let route = engine.discover(&grid, cell(0, 0), cell(3, 0), 3).unwrap();
        assert_eq!(ids(&route), vec![1, 2, 3, 4]);
    }

    #[test]
    fn zero_hops_between_distinct_cells_is_not_found() {
        let grid = grid_of(&[(1, 0, 0), (2, 1, 0)]);
        assert!(DiscoveryEngine::default()
            .discover(&grid, cell(0, 0), cell(1, 0), 0)
            .is_err());
    }

    #[test]
    fn empty_cells_are_reported() {
        let grid = grid_of(&[(1, 0, 0)]);
        let err = DiscoveryEngine::default()
            .discover(&grid, cell(0, 0), cell(50, 50), 5)
            .unwrap_err();
        assert_eq!(err, DiscoveryError::NoWaypointAtCell(cell(50, 50)));
    }

    #[test]
    fn rejects_hop_bound_above_limit() {
        let grid = grid_of(&[(1, 0, 0)]);
        let err = DiscoveryEngine::new(8)
            .discover(&grid, cell(0, 0), cell(0, 0), 9)
            .unwrap_err();
        assert_eq!(
            err,
            DiscoveryError::HopLimitExceeded {
                requested: 9,
                limit: 8
            }
        );
    }

    // S(0,0) and E(2,0) share two routes: a 2-hop one through M(1,0), whose
    // coordinates are pushed two degrees north, and a light 4-hop detour
    // S -> (0,1) -> (1,2) -> (2,1) -> E. Cell (1,1) is left empty.
    fn detour_grid() -> GridGraph {
        let mut grid = GridGraph::new();
        let displaced = {
            let base = waypoint(2, 1, 0).coord;
            Coordinate {
                lat: base.lat + 2.0,
                lng: base.lng,
            }
        };
        grid.insert_waypoint(waypoint(1, 0, 0)).unwrap();
        grid.insert_waypoint(waypoint_at(2, 1, 0, displaced)).unwrap();
        grid.insert_waypoint(waypoint(3, 0, 1)).unwrap();
        grid.insert_waypoint(waypoint(4, 1, 2)).unwrap();
        grid.insert_waypoint(waypoint(5, 2, 1)).unwrap();
        grid.insert_waypoint(waypoint(6, 2, 0)).unwrap();
        grid
    }

    #[test]
    fn prefers_lighter_path_when_hops_allow() {
        let grid = detour_grid();
        let route = DiscoveryEngine::default()
            .discover(&grid, cell(0, 0), cell(2, 0), 4)
            .unwrap();
        assert_eq!(ids(&route), vec![1, 3, 4, 5, 6]);
        assert!(route.distance_km < 60.0);
    }

    #[test]
    fn hop_bound_forces_heavier_short_path() {
        let grid = detour_grid();
        let route = DiscoveryEngine::default()
            .discover(&grid, cell(0, 0), cell(2, 0), 3)
            .unwrap();
        assert_eq!(ids(&route), vec![1, 2, 6]);
        assert!(route.distance_km > 400.0);
    }

    #[test]
    fn shared_start_cell_uses_lowest_id() {
        let mut grid = grid_of(&[(5, 0, 0), (6, 1, 0)]);
        grid.insert_waypoint(waypoint(2, 0, 0)).unwrap();

        let route = DiscoveryEngine::default()
            .discover(&grid, cell(0, 0), cell(1, 0), 1)
            .unwrap();
        assert_eq!(ids(&route), vec![2, 6]);
    }

    #[test]
    fn total_distance_matches_edge_sum() {
        let grid = grid_of(&[(1, 10, 10), (2, 11, 10), (3, 12, 11), (4, 13, 12)]);
        let route = DiscoveryEngine::default()
            .discover(&grid, cell(10, 10), cell(13, 12), 5)
            .unwrap();

        let edge_sum: f64 = route
            .waypoints
            .windows(2)
            .map(|w| grid.edge_weight(w[0].id, w[1].id).unwrap())
            .sum();
        assert!((route.distance_km - edge_sum).abs() < 1e-9);

        let response = route.to_response();
        assert_eq!(response.total_distance_km, round_km(edge_sum));
        assert_eq!(response.waypoints[0].grid, [10, 10]);
        assert_eq!(response.waypoints.last().unwrap().grid, [13, 12]);
    }
}
