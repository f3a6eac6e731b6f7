use clap::{Args, Parser, Subcommand};
use rand::{rngs::StdRng, SeedableRng};
use ridersbuddy::{
    models::{
        CreateRouteRequest, CreateWaypointRequest, Difficulty, DiscoverRouteRequest, RouteFilter,
        WaypointFilter, WaypointKind,
    },
    seed::{seed_grid, DEFAULT_SEED_WAYPOINTS},
    AppConfig, Database, MemoryStore, ServiceConfig, TouringService,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Grid waypoints, route discovery and route assembly for motorcycle tours"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database schema
    Migrate,
    /// Seed an in-memory grid and run one discovery without a database
    Demo(DemoArgs),
    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that run against PostgreSQL.
#[derive(Debug, Subcommand)]
enum StoreCommand {
    /// Scatter random waypoints over the grid
    Seed {
        #[arg(long, default_value_t = DEFAULT_SEED_WAYPOINTS)]
        waypoints: usize,
        /// Fixed RNG seed for a reproducible grid
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// Add one waypoint and connect it to its grid neighbours
    AddWaypoint {
        #[arg(long)]
        name: String,
        #[arg(long)]
        grid_x: i32,
        #[arg(long)]
        grid_y: i32,
        /// Latitude; derived from the cell unless both lat and lng are given
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,
        /// viewpoint, cafe, rest_area or fuel_station
        #[arg(long, default_value = "viewpoint")]
        kind: WaypointKind,
    },
    ListWaypoints {
        #[arg(long)]
        grid_x: Option<u8>,
        #[arg(long)]
        grid_y: Option<u8>,
    },
    /// Shortest path between two grid cells, e.g. `--start 0,0 --end 5,3`
    Discover {
        #[arg(long, value_parser = parse_cell)]
        start: [i32; 2],
        #[arg(long, value_parser = parse_cell)]
        end: [i32; 2],
        #[arg(long, default_value_t = shared::default_max_hops())]
        max_hops: u32,
    },
    /// Store a route over waypoint ids in the given order
    CreateRoute {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "moderate")]
        difficulty: Difficulty,
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        waypoints: Vec<i64>,
    },
    ShowRoute {
        id: i64,
    },
    ListRoutes {
        #[arg(long)]
        difficulty: Option<Difficulty>,
        #[arg(long)]
        min_distance_km: Option<f64>,
        #[arg(long)]
        max_distance_km: Option<f64>,
    },
}

#[derive(Debug, Args)]
struct DemoArgs {
    #[arg(long, default_value_t = DEFAULT_SEED_WAYPOINTS)]
    waypoints: usize,
    #[arg(long, default_value_t = 7)]
    rng_seed: u64,
    #[arg(long, value_parser = parse_cell, default_value = "10,10")]
    start: [i32; 2],
    #[arg(long, value_parser = parse_cell, default_value = "20,20")]
    end: [i32; 2],
    #[arg(long, default_value_t = 50)]
    max_hops: u32,
}

fn parse_cell(raw: &str) -> Result<[i32; 2], String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{raw}`"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<i32>()
            .map_err(|e| format!("invalid grid value `{v}`: {e}"))
    };
    Ok([parse(x)?, parse(y)?])
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ridersbuddy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let command = match cli.command {
        Command::Demo(args) => return demo(&config, args).await,
        Command::Migrate => {
            let db = connect(&config).await?;
            db.migrate().await?;
            db.close().await;
            return Ok(());
        }
        Command::Store(command) => command,
    };

    let service = TouringService::open(connect(&config).await?, ServiceConfig::from(&config)).await?;
    let result = run(&service, command).await;
    service.store().close().await;
    result
}

async fn connect(config: &AppConfig) -> Result<Database, Box<dyn std::error::Error>> {
    Ok(Database::connect(config.require_database_url()?, config.max_connections).await?)
}

async fn demo(config: &AppConfig, args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let service = TouringService::open(MemoryStore::new(), ServiceConfig::from(config)).await?;
    seed_grid(&service, &mut StdRng::seed_from_u64(args.rng_seed), args.waypoints).await?;

    let request = DiscoverRouteRequest {
        start_grid: args.start,
        end_grid: args.end,
        max_hops: args.max_hops,
    };
    print_json(&service.discover_route(&request).await?)
}

async fn run(
    service: &TouringService<Database>,
    command: StoreCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        StoreCommand::Seed {
            waypoints,
            rng_seed,
        } => {
            let mut rng = match rng_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            let created = seed_grid(service, &mut rng, waypoints).await?;
            print_json(&service.graph_stats().await)?;
            tracing::info!("created {} waypoints", created.len());
        }
        StoreCommand::AddWaypoint {
            name,
            grid_x,
            grid_y,
            lat,
            lng,
            kind,
        } => {
            let waypoint = service
                .create_waypoint(CreateWaypointRequest {
                    name,
                    grid_x,
                    grid_y,
                    lat,
                    lng,
                    kind,
                })
                .await?;
            print_json(&waypoint)?;
        }
        StoreCommand::ListWaypoints { grid_x, grid_y } => {
            print_json(&service.list_waypoints(WaypointFilter { grid_x, grid_y }).await?)?;
        }
        StoreCommand::Discover {
            start,
            end,
            max_hops,
        } => {
            let request = DiscoverRouteRequest {
                start_grid: start,
                end_grid: end,
                max_hops,
            };
            print_json(&service.discover_route(&request).await?)?;
        }
        StoreCommand::CreateRoute {
            name,
            difficulty,
            waypoints,
        } => {
            let route = service
                .create_route(CreateRouteRequest {
                    name,
                    difficulty,
                    waypoint_ids: waypoints,
                })
                .await?;
            print_json(&route)?;
        }
        StoreCommand::ShowRoute { id } => print_json(&service.get_route(id).await?)?,
        StoreCommand::ListRoutes {
            difficulty,
            min_distance_km,
            max_distance_km,
        } => {
            let filter = RouteFilter {
                difficulty,
                min_distance_km,
                max_distance_km,
            };
            print_json(&service.list_routes(filter).await?)?;
        }
    }
    Ok(())
}
