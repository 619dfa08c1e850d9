use std::path::PathBuf;
use std::time::Duration;

use catalog_rpc::auth::methods;
use catalog_rpc::client::{AuthClient, AuthInterceptor, CatalogClient, TokenRefresher};
use catalog_rpc::proto::{Entity, Filter};
use clap::{Parser, Subcommand};
use tonic::transport::Channel;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Authenticated catalog client", long_about = None)]
struct Cli {
    #[arg(short, long, env = "CATALOG_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    #[arg(short, long, env = "CATALOG_USERNAME", default_value = "admin1")]
    username: String,

    #[arg(short, long, env = "CATALOG_PASSWORD", default_value = "secret")]
    password: String,

    /// Seconds between token refreshes
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    refresh_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an entity; an empty id lets the server generate one
    Create {
        #[arg(long, default_value = "")]
        id: String,

        #[arg(long)]
        brand: String,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "4")]
        cpu_cores: u32,

        #[arg(long, default_value = "2.5")]
        cpu_ghz: f64,

        #[arg(long, default_value = "8")]
        ram_gb: u32,

        #[arg(long)]
        price_usd: f64,

        #[arg(long, default_value = "2024")]
        release_year: u32,
    },

    /// Search entities; zero bounds are ignored
    Search {
        #[arg(long, default_value = "0")]
        max_price_usd: f64,

        #[arg(long, default_value = "0")]
        min_cpu_cores: u32,

        #[arg(long, default_value = "0")]
        min_cpu_ghz: f64,

        #[arg(long, default_value = "0")]
        min_ram_gb: u32,
    },

    /// Upload a file as an asset of an entity
    Upload {
        #[arg(long)]
        entity_id: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Rate entities on one stream
    Rate {
        #[arg(long, value_delimiter = ',', help = "Comma-separated entity ids")]
        entity_ids: Vec<String>,

        #[arg(
            long,
            value_delimiter = ',',
            help = "Comma-separated scores (must match order of entity ids)"
        )]
        scores: Vec<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let channel = Channel::from_shared(cli.server.clone())?.connect().await?;
    let auth = AuthClient::new(channel.clone(), cli.username, cli.password);
    let interceptor = AuthInterceptor::new(methods::PROTECTED);
    let refresher = TokenRefresher::start(
        auth,
        interceptor.clone(),
        Duration::from_secs(cli.refresh_secs),
    )
    .await?;

    let mut catalog = CatalogClient::new(channel, interceptor);
    let result = run(&mut catalog, cli.command).await;

    refresher.shutdown().await;
    result
}

async fn run(catalog: &mut CatalogClient, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Create {
            id,
            brand,
            name,
            cpu_cores,
            cpu_ghz,
            ram_gb,
            price_usd,
            release_year,
        } => {
            let id = catalog
                .create_entity(Entity {
                    id,
                    brand,
                    name,
                    cpu_cores,
                    cpu_ghz,
                    ram_gb,
                    price_usd,
                    release_year,
                })
                .await?;
            println!("Created entity {id}");
        }
        Commands::Search {
            max_price_usd,
            min_cpu_cores,
            min_cpu_ghz,
            min_ram_gb,
        } => {
            let found = catalog
                .search_entities(Filter {
                    max_price_usd,
                    min_cpu_cores,
                    min_cpu_ghz,
                    min_ram_gb,
                })
                .await?;

            println!("Found {} entities", found.len());
            println!("{}", "=".repeat(80));
            for entity in found {
                println!(
                    "{}  {} {}  {} cores @ {:.1} GHz, {} GB RAM, ${:.2}",
                    entity.id,
                    entity.brand,
                    entity.name,
                    entity.cpu_cores,
                    entity.cpu_ghz,
                    entity.ram_gb,
                    entity.price_usd
                );
            }
        }
        Commands::Upload { entity_id, file } => {
            let response = catalog.upload_asset(&entity_id, &file).await?;
            println!("Uploaded asset {} ({} bytes)", response.id, response.size);
        }
        Commands::Rate { entity_ids, scores } => {
            if entity_ids.len() != scores.len() {
                return Err(format!(
                    "got {} entity ids but {} scores",
                    entity_ids.len(),
                    scores.len()
                )
                .into());
            }

            let echoes = catalog
                .rate_entities(entity_ids.into_iter().zip(scores).collect())
                .await?;
            for echo in echoes {
                println!(
                    "{}  rated {} times, average {:.2}",
                    echo.entity_id, echo.rated_count, echo.average_score
                );
            }
        }
    }

    Ok(())
}
