use rand::Rng;

use crate::{
    error::TouringError,
    grid::GRID_SIZE,
    models::{CreateWaypointRequest, Waypoint, WaypointKind},
    service::TouringService,
    store::TouringStore,
};

pub const DEFAULT_SEED_WAYPOINTS: usize = 500;

/// Random waypoint requests scattered over the grid. Coordinates are left
/// empty so they are derived from the cell on insert.
pub fn random_waypoints<R: Rng>(rng: &mut R, count: usize) -> Vec<CreateWaypointRequest> {
    (0..count)
        .map(|i| {
            let grid_x = rng.random_range(0..GRID_SIZE);
            let grid_y = rng.random_range(0..GRID_SIZE);
            let kind = WaypointKind::ALL[rng.random_range(0..WaypointKind::ALL.len())];
            CreateWaypointRequest {
                name: format!("Waypoint_{grid_x}_{grid_y}_{i}"),
                grid_x,
                grid_y,
                lat: None,
                lng: None,
                kind,
            }
        })
        .collect()
}

/// Insert `count` random waypoints through the service so each one is
/// connected to its neighbours.
pub async fn seed_grid<S: TouringStore, R: Rng>(
    service: &TouringService<S>,
    rng: &mut R,
    count: usize,
) -> Result<Vec<Waypoint>, TouringError> {
    let mut created = Vec::with_capacity(count);
    for (i, request) in random_waypoints(rng, count).into_iter().enumerate() {
        created.push(service.create_waypoint(request).await?);
        if (i + 1) % 100 == 0 {
            tracing::info!("seeded {}/{} waypoints", i + 1, count);
        }
    }

    let stats = service.graph_stats().await;
    tracing::info!(
        "seeding complete: {} waypoints, {} adjacency edges",
        stats.waypoints,
        stats.edges
    );
    Ok(created)
}
