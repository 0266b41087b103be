//! `shuttle` - run the dispatch side, or talk to it through the queue.
//!
//! `serve` and the client commands only meet when they share a durable
//! backend (`SHUTTLE__QUEUE__BACKEND=sqlite`); `demo` runs both sides in one
//! process over whatever backend is configured.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use shuttle_core::app::OnlineUpdate;
use shuttle_core::config::BackendKind;
use shuttle_core::domain::{JobName, JobStatus};
use shuttle_core::impls::InMemoryFleetStore;
use shuttle_core::observability::init_tracing;
use shuttle_core::{
    FleetClient, FleetHandlers, JobStatusRegistry, Shuttle, ShuttleBuilder, ShuttleConfig,
};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "shuttle")]
#[command(about = "Typed request/reply over a shared queue")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, env = "SHUTTLE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch loop against a seeded fleet until Ctrl-C
    Serve,
    /// List cars, optionally of one company
    Cars(CarsArgs),
    /// List companies
    Companies,
    /// Show one car
    Car { id: Uuid },
    /// Set a car online or offline
    SetOnline(SetOnlineArgs),
    /// Check whether a registration number is still free
    RegAvailable { reg_nr: String },
    /// Check whether a VIN is still free
    VinAvailable { vin: String },
    /// Serve and call in one process
    Demo,
}

#[derive(Args)]
struct CarsArgs {
    #[arg(long)]
    company: Option<Uuid>,
}

#[derive(Args)]
struct SetOnlineArgs {
    id: Uuid,
    /// `true` or `false`
    #[arg(action = clap::ArgAction::Set)]
    online: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ShuttleConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    let shuttle = ShuttleBuilder::from_config(&config)
        .await
        .context("connecting to the queue backend")?
        .build()
        .await?;

    match cli.command {
        Commands::Serve => serve(&shuttle).await,
        Commands::Demo => demo(&shuttle).await,
        command => {
            if config.queue.backend == BackendKind::Memory {
                warn!("in-memory backend: nothing outside this process will answer");
            }
            run_client(FleetClient::new(shuttle.gateway()), command).await
        }
    }
}

async fn serve(shuttle: &Shuttle) -> Result<()> {
    let handlers = FleetHandlers::in_memory(InMemoryFleetStore::seeded());
    let supervisor = shuttle.supervise(handlers.into_table());
    info!("serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");
    supervisor.shutdown_and_join().await;
    print_json(&shuttle.stats().snapshot())
}

async fn run_client(client: FleetClient, command: Commands) -> Result<()> {
    match command {
        Commands::Cars(args) => match args.company {
            Some(company_id) => print_json(&client.cars_for_company(company_id).await?),
            None => print_json(&client.cars().await?),
        },
        Commands::Companies => print_json(&client.companies().await?),
        Commands::Car { id } => print_json(&client.car(id).await?),
        Commands::SetOnline(args) => match client.set_online(args.id, args.online).await? {
            OnlineUpdate::Applied(car) => print_json(&car),
            OnlineUpdate::HeldWhileEditing(car) => {
                bail!("car {} is being edited; online stays {}", car.id, car.online)
            }
        },
        Commands::RegAvailable { reg_nr } => print_json(&client.reg_nr_available(&reg_nr).await?),
        Commands::VinAvailable { vin } => print_json(&client.vin_available(&vin).await?),
        Commands::Serve | Commands::Demo => bail!("not a client command"),
    }
}

async fn demo(shuttle: &Shuttle) -> Result<()> {
    let handlers = FleetHandlers::in_memory(InMemoryFleetStore::seeded());
    let supervisor = shuttle.supervise(handlers.into_table());
    let client = FleetClient::new(shuttle.gateway());
    let jobs = JobStatusRegistry::new();

    let companies = client.overview().await?;
    for company in &companies {
        println!("{} ({} cars)", company.name, company.cars.len());
    }

    // every car goes online, concurrently over the shared response channel
    let mut updates = JoinSet::new();
    for car in client.cars().await? {
        let client = client.clone();
        updates.spawn(async move { client.set_online(car.id, true).await });
    }
    while let Some(update) = updates.join_next().await {
        if let OnlineUpdate::HeldWhileEditing(car) = update?? {
            warn!(car = %car.id, "held while editing");
        }
    }

    jobs.update_status(JobName::TruckJob, JobStatus::Running);
    jobs.toggle(JobName::AirJob);
    print_json(&jobs.all())?;

    supervisor.shutdown_and_join().await;
    print_json(&shuttle.stats().snapshot())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
