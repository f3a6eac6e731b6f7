// PostgreSQL implementation of the touring store.
// Waypoints and their adjacency edges are written in one transaction, so the
// in-process adjacency index can always be rebuilt or caught up from these
// tables.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use crate::{
    adjacency::neighbour_edges,
    assembly::PlannedRoute,
    grid::GridCell,
    models::{
        AdjacencyEdge, Coordinate, Difficulty, NewWaypoint, RouteFilter, RouteRecord, Waypoint,
        WaypointFilter, WaypointKind,
    },
    store::{StoreError, TouringStore},
};

/// Advisory lock key guarding waypoint inserts.
const WAYPOINT_WRITE_LOCK: i64 = 0x5249_4452;

const WAYPOINT_COLUMNS: &str = "id, name, grid_x, grid_y, lat, lng, kind, created_at";

const ROUTE_COLUMNS: &str = r#"
    r.id, r.name, r.difficulty, r.distance_km, r.start_waypoint_id, r.end_waypoint_id,
    r.created_at,
    ARRAY(
        SELECT rw.waypoint_id FROM route_waypoints rw
        WHERE rw.route_id = r.id
        ORDER BY rw.sequence_order
    ) AS waypoint_ids
"#;

#[derive(Debug, FromRow)]
struct WaypointRow {
    id: i64,
    name: String,
    grid_x: i32,
    grid_y: i32,
    lat: f64,
    lng: f64,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<WaypointRow> for Waypoint {
    type Error = StoreError;

    fn try_from(row: WaypointRow) -> Result<Self, Self::Error> {
        let cell = GridCell::new(row.grid_x, row.grid_y)
            .map_err(|e| StoreError::InvalidData(format!("waypoint {}: {e}", row.id)))?;
        let kind = row
            .kind
            .parse::<WaypointKind>()
            .map_err(|e| StoreError::InvalidData(format!("waypoint {}: {e}", row.id)))?;

        Ok(Waypoint {
            id: row.id,
            name: row.name,
            cell,
            coord: Coordinate {
                lat: row.lat,
                lng: row.lng,
            },
            kind,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RouteRow {
    id: i64,
    name: String,
    difficulty: String,
    distance_km: f64,
    start_waypoint_id: i64,
    end_waypoint_id: i64,
    created_at: DateTime<Utc>,
    #[sqlx(default)]
    waypoint_ids: Vec<i64>,
}

impl TryFrom<RouteRow> for RouteRecord {
    type Error = StoreError;

    fn try_from(row: RouteRow) -> Result<Self, Self::Error> {
        let difficulty = row
            .difficulty
            .parse::<Difficulty>()
            .map_err(|e| StoreError::InvalidData(format!("route {}: {e}", row.id)))?;

        Ok(RouteRecord {
            id: row.id,
            name: row.name,
            difficulty,
            distance_km: row.distance_km,
            start_waypoint_id: row.start_waypoint_id,
            end_waypoint_id: row.end_waypoint_id,
            waypoint_ids: row.waypoint_ids,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EdgeRow {
    from_waypoint_id: i64,
    to_waypoint_id: i64,
    distance_km: f64,
}

impl From<EdgeRow> for AdjacencyEdge {
    fn from(row: EdgeRow) -> Self {
        AdjacencyEdge {
            from: row.from_waypoint_id,
            to: row.to_waypoint_id,
            distance_km: row.distance_km,
        }
    }
}

/// Database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a bounded connection pool.
    ///
    /// # Errors
    /// Returns StoreError if the connection fails
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool created (max {max_connections} connections)");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;

        let migration_sql = include_str!("../migrations/20250301_create_touring_schema.sql");

        // raw_sql accepts several statements in one call
        sqlx::raw_sql(migration_sql).execute(&mut *conn).await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl TouringStore for Database {
    async fn create_waypoint(
        &self,
        waypoint: &NewWaypoint,
    ) -> Result<(Waypoint, Vec<AdjacencyEdge>), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Held until commit: serializes waypoint writers across processes and
        // makes ids commit in order.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(WAYPOINT_WRITE_LOCK)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, WaypointRow>(&format!(
            r#"
            INSERT INTO waypoints (name, grid_x, grid_y, lat, lng, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {WAYPOINT_COLUMNS}
            "#
        ))
        .bind(&waypoint.name)
        .bind(i32::from(waypoint.cell.x()))
        .bind(i32::from(waypoint.cell.y()))
        .bind(waypoint.coord.lat)
        .bind(waypoint.coord.lng)
        .bind(waypoint.kind.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let stored = Waypoint::try_from(row)?;

        let neighbour_rows = sqlx::query_as::<_, WaypointRow>(&format!(
            r#"
            SELECT {WAYPOINT_COLUMNS} FROM waypoints
            WHERE grid_x BETWEEN $1 - 1 AND $1 + 1
              AND grid_y BETWEEN $2 - 1 AND $2 + 1
              AND id <> $3
            ORDER BY id
            "#
        ))
        .bind(i32::from(stored.cell.x()))
        .bind(i32::from(stored.cell.y()))
        .bind(stored.id)
        .fetch_all(&mut *tx)
        .await?;
        let neighbours = neighbour_rows
            .into_iter()
            .map(Waypoint::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let edges = neighbour_edges(&stored, &neighbours);
        for edge in &edges {
            sqlx::query(
                r#"
                INSERT INTO grid_adjacency (from_waypoint_id, to_waypoint_id, distance_km)
                VALUES ($1, $2, $3)
                ON CONFLICT (from_waypoint_id, to_waypoint_id) DO NOTHING
                "#,
            )
            .bind(edge.from)
            .bind(edge.to)
            .bind(edge.distance_km)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        tx.commit().await?;

        tracing::info!(
            "Waypoint saved: {} (ID: {}) at {} with {} edges",
            stored.name,
            stored.id,
            stored.cell,
            edges.len()
        );
        Ok((stored, edges))
    }

    async fn get_waypoint(&self, id: i64) -> Result<Waypoint, StoreError> {
        let row = sqlx::query_as::<_, WaypointRow>(&format!(
            "SELECT {WAYPOINT_COLUMNS} FROM waypoints WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "waypoint",
            id,
        })?;

        Waypoint::try_from(row)
    }

    async fn waypoints_by_ids(&self, ids: &[i64]) -> Result<Vec<Waypoint>, StoreError> {
        let rows = sqlx::query_as::<_, WaypointRow>(&format!(
            "SELECT {WAYPOINT_COLUMNS} FROM waypoints WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Waypoint::try_from).collect()
    }

    async fn list_waypoints(&self, filter: WaypointFilter) -> Result<Vec<Waypoint>, StoreError> {
        let rows = sqlx::query_as::<_, WaypointRow>(&format!(
            r#"
            SELECT {WAYPOINT_COLUMNS} FROM waypoints
            WHERE ($1::INTEGER IS NULL OR grid_x = $1)
              AND ($2::INTEGER IS NULL OR grid_y = $2)
            ORDER BY id
            "#
        ))
        .bind(filter.grid_x.map(i32::from))
        .bind(filter.grid_y.map(i32::from))
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!("Retrieved {} waypoints", rows.len());
        rows.into_iter().map(Waypoint::try_from).collect()
    }

    async fn list_adjacency(&self) -> Result<Vec<AdjacencyEdge>, StoreError> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            "SELECT from_waypoint_id, to_waypoint_id, distance_km FROM grid_adjacency",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AdjacencyEdge::from).collect())
    }

    async fn changes_since(
        &self,
        after_id: i64,
    ) -> Result<(Vec<Waypoint>, Vec<AdjacencyEdge>), StoreError> {
        let waypoints = sqlx::query_as::<_, WaypointRow>(&format!(
            "SELECT {WAYPOINT_COLUMNS} FROM waypoints WHERE id > $1 ORDER BY id"
        ))
        .bind(after_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Waypoint::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let Some(upper) = waypoints.last().map(|w| w.id) else {
            return Ok((waypoints, Vec::new()));
        };

        // Waypoints committed after the first read are left for the next sync.
        let edges = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT from_waypoint_id, to_waypoint_id, distance_km FROM grid_adjacency
            WHERE (from_waypoint_id > $1 OR to_waypoint_id > $1)
              AND from_waypoint_id <= $2
              AND to_waypoint_id <= $2
            "#,
        )
        .bind(after_id)
        .bind(upper)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AdjacencyEdge::from)
        .collect();

        tracing::debug!("Loaded {} waypoints newer than {}", waypoints.len(), after_id);
        Ok((waypoints, edges))
    }

    async fn create_route(&self, route: &PlannedRoute) -> Result<RouteRecord, StoreError> {
        let (start_waypoint_id, end_waypoint_id) = route
            .endpoints()
            .ok_or_else(|| StoreError::InvalidData("route has no waypoints".to_string()))?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RouteRow>(
            r#"
            INSERT INTO routes (name, difficulty, distance_km, start_waypoint_id, end_waypoint_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, difficulty, distance_km, start_waypoint_id, end_waypoint_id, created_at
            "#,
        )
        .bind(&route.name)
        .bind(route.difficulty.as_str())
        .bind(route.distance_km)
        .bind(start_waypoint_id)
        .bind(end_waypoint_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match map_write_error(err) {
            StoreError::Duplicate(_) => StoreError::Duplicate(format!("route '{}'", route.name)),
            other => other,
        })?;

        for (sequence, waypoint_id) in route.memberships() {
            sqlx::query(
                r#"
                INSERT INTO route_waypoints (route_id, waypoint_id, sequence_order)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(row.id)
            .bind(waypoint_id)
            .bind(sequence)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        tx.commit().await?;

        let mut record = RouteRecord::try_from(row)?;
        record.waypoint_ids = route.waypoint_ids.clone();

        tracing::info!("Route saved: {} (ID: {})", record.name, record.id);
        Ok(record)
    }

    async fn get_route(&self, id: i64) -> Result<RouteRecord, StoreError> {
        let row = sqlx::query_as::<_, RouteRow>(&format!(
            "SELECT {ROUTE_COLUMNS} FROM routes r WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "route", id })?;

        RouteRecord::try_from(row)
    }

    async fn list_routes(&self, filter: RouteFilter) -> Result<Vec<RouteRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RouteRow>(&format!(
            r#"
            SELECT {ROUTE_COLUMNS} FROM routes r
            WHERE ($1::TEXT IS NULL OR r.difficulty = $1)
              AND ($2::DOUBLE PRECISION IS NULL OR r.distance_km >= $2)
              AND ($3::DOUBLE PRECISION IS NULL OR r.distance_km <= $3)
            ORDER BY r.id
            "#
        ))
        .bind(filter.difficulty.map(Difficulty::as_str))
        .bind(filter.min_distance_km)
        .bind(filter.max_distance_km)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!("Retrieved {} routes", rows.len());
        rows.into_iter().map(RouteRecord::try_from).collect()
    }
}

/// Translate constraint violations into store errors callers can act on.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate(db_err.message().to_string());
        }
        if db_err.is_foreign_key_violation() {
            return StoreError::InvalidData(db_err.message().to_string());
        }
    }
    StoreError::Connection(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridBounds;

    /// Helper to create test database with testcontainers
    /// Returns (Database, Container) - keep container alive to prevent Docker cleanup
    async fn setup_test_db() -> (
        Database,
        testcontainers::ContainerAsync<testcontainers_modules::postgres::Postgres>,
    ) {
        use testcontainers::{runners::AsyncRunner, ImageExt};
        use testcontainers_modules::postgres::Postgres;

        let container = Postgres::default()
            .with_tag("17-alpine")
            .start()
            .await
            .expect("Failed to start PostgreSQL container");

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");
        let database_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let db = Database::connect(&database_url, 5)
            .await
            .expect("Failed to connect to test DB");
        db.migrate().await.expect("Failed to run migrations");

        (db, container)
    }

    fn new_waypoint(x: i32, y: i32) -> NewWaypoint {
        let cell = GridCell::new(x, y).unwrap();
        NewWaypoint {
            name: format!("Waypoint_{x}_{y}"),
            cell,
            coord: GridBounds::default().to_coordinates(cell),
            kind: WaypointKind::FuelStation,
        }
    }

    fn planned(name: &str, ids: Vec<i64>) -> PlannedRoute {
        PlannedRoute {
            name: name.to_string(),
            difficulty: Difficulty::Hard,
            distance_km: 12.5,
            waypoint_ids: ids,
        }
    }

    #[tokio::test]
    async fn test_waypoint_and_edges_commit_together() {
        let (db, _container) = setup_test_db().await;

        let (first, edges) = db
            .create_waypoint(&new_waypoint(10, 10))
            .await
            .expect("Failed to save waypoint");
        assert!(edges.is_empty());

        let (second, edges) = db
            .create_waypoint(&new_waypoint(11, 10))
            .await
            .expect("Failed to save waypoint");

        let pairs: Vec<_> = edges.iter().map(|e| (e.from, e.to)).collect();
        assert_eq!(pairs, vec![(second.id, first.id), (first.id, second.id)]);
        assert_eq!(second.cell, GridCell::new(11, 10).unwrap());
        assert_eq!(second.kind, WaypointKind::FuelStation);

        let stored = db.list_adjacency().await.expect("Failed to list edges");
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_same_cell_and_distant_waypoints_stay_unconnected() {
        let (db, _container) = setup_test_db().await;

        for (x, y) in [(3, 3), (3, 3), (5, 3), (50, 50)] {
            db.create_waypoint(&new_waypoint(x, y)).await.unwrap();
        }
        assert!(db.list_adjacency().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_separate_writers_see_each_other() {
        let (db, _container) = setup_test_db().await;
        let other = Database::from_pool(db.pool.clone());

        let wa = new_waypoint(50, 50);
        let wb = new_waypoint(51, 50);
        let (a, b) = tokio::join!(
            db.create_waypoint(&wa),
            other.create_waypoint(&wb),
        );
        let (a, _) = a.expect("Failed to save waypoint");
        let (b, _) = b.expect("Failed to save waypoint");

        let mut pairs: Vec<_> = db
            .list_adjacency()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.from, e.to))
            .collect();
        pairs.sort();
        let mut expected = vec![(a.id, b.id), (b.id, a.id)];
        expected.sort();
        assert_eq!(pairs, expected);
    }

    #[tokio::test]
    async fn test_changes_since_returns_newer_rows() {
        let (db, _container) = setup_test_db().await;

        for (x, y) in [(0, 0), (1, 0), (1, 1), (30, 30)] {
            db.create_waypoint(&new_waypoint(x, y)).await.unwrap();
        }

        let (waypoints, edges) = db.changes_since(2).await.unwrap();
        let ids: Vec<_> = waypoints.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(edges.len(), 4);
        assert!(edges.iter().all(|e| e.from == 3 || e.to == 3));

        let (none, no_edges) = db.changes_since(4).await.unwrap();
        assert!(none.is_empty() && no_edges.is_empty());
    }

    #[tokio::test]
    async fn test_list_waypoints_by_cell() {
        let (db, _container) = setup_test_db().await;

        for (x, y) in [(1, 1), (1, 2), (2, 1), (1, 1)] {
            db.create_waypoint(&new_waypoint(x, y))
                .await
                .unwrap();
        }

        let column = db
            .list_waypoints(WaypointFilter { grid_x: Some(1), grid_y: None })
            .await
            .unwrap();
        assert_eq!(column.len(), 3);

        let cell = db
            .list_waypoints(WaypointFilter { grid_x: Some(1), grid_y: Some(1) })
            .await
            .unwrap();
        let ids: Vec<_> = cell.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_save_and_retrieve_route() {
        let (db, _container) = setup_test_db().await;

        for (x, y) in [(0, 0), (5, 5), (9, 9)] {
            db.create_waypoint(&new_waypoint(x, y))
                .await
                .unwrap();
        }

        let saved = db
            .create_route(&planned("Sierra Loop", vec![3, 1, 2]))
            .await
            .expect("Failed to save route");
        assert_eq!(saved.start_waypoint_id, 3);
        assert_eq!(saved.end_waypoint_id, 2);

        let retrieved = db.get_route(saved.id).await.expect("Failed to retrieve route");
        assert_eq!(retrieved.name, "Sierra Loop");
        assert_eq!(retrieved.difficulty, Difficulty::Hard);
        assert_eq!(retrieved.waypoint_ids, vec![3, 1, 2]);
        assert_eq!(retrieved.distance_km, 12.5);
    }

    #[tokio::test]
    async fn test_duplicate_route_name() {
        let (db, _container) = setup_test_db().await;

        for (x, y) in [(0, 0), (5, 5)] {
            db.create_waypoint(&new_waypoint(x, y))
                .await
                .unwrap();
        }
        db.create_route(&planned("Twice", vec![1, 2])).await.unwrap();

        let result = db.create_route(&planned("Twice", vec![2, 1])).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert_eq!(db.list_routes(RouteFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_routes_with_filter() {
        let (db, _container) = setup_test_db().await;

        for (x, y) in [(0, 0), (5, 5)] {
            db.create_waypoint(&new_waypoint(x, y))
                .await
                .unwrap();
        }
        db.create_route(&planned("Hard one", vec![1, 2])).await.unwrap();
        db.create_route(&PlannedRoute {
            difficulty: Difficulty::Easy,
            distance_km: 80.0,
            ..planned("Easy one", vec![2, 1])
        })
        .await
        .unwrap();

        let easy = db
            .list_routes(RouteFilter { difficulty: Some(Difficulty::Easy), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(easy.len(), 1);
        assert_eq!(easy[0].waypoint_ids, vec![2, 1]);

        let short = db
            .list_routes(RouteFilter { max_distance_km: Some(20.0), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].name, "Hard one");
    }

    #[tokio::test]
    async fn test_empty_route_is_rejected() {
        let (db, _container) = setup_test_db().await;

        let result = db.create_route(&planned("Empty", Vec::new())).await;
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_get_nonexistent_route() {
        let (db, _container) = setup_test_db().await;

        let result = db.get_route(12345).await;
        assert!(matches!(
            result,
            Err(StoreError::NotFound { entity: "route", id: 12345 })
        ));
    }
}
