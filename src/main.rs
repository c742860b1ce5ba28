use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};

use catering_allocations::{
    config::{self, AppConfig},
    db::{self, DbPool},
    services::{
        company_settings::load_company_settings, AllocationReportService, AllocationSyncService,
        MeasurementGraph, OrderPlan, Quantity, QuantityAdjuster, ReportFilter, ReportGrouping,
    },
};

#[derive(Parser)]
#[command(
    name = "catering-allocations",
    about = "Measurement conversion and raw material allocation for catering orders",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    /// Company whose quantity settings apply
    #[arg(long, global = true, default_value_t = 1)]
    company: i64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Convert a quantity between two units of one family
    Convert {
        quantity: Decimal,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Adjust a quantity and split off anything beyond the largest bucket
    Adjust {
        quantity: Decimal,
        #[arg(long)]
        unit: i64,
        /// Apply adjustment even when the company setting disables it
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        supplier_rate: bool,
    },
    /// Recompute all allocations of an order from a JSON order plan
    Sync {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Delete allocations of functions no longer in the order
    Prune {
        #[arg(long)]
        order: i64,
        #[arg(long, value_delimiter = ',')]
        functions: Vec<i64>,
    },
    /// Summarise allocations by supplier, category or order date
    Report {
        #[arg(value_enum)]
        grouping: Grouping,
        #[arg(long = "order")]
        orders: Vec<i64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Grouping {
    Supplier,
    Category,
    Date,
}

impl From<Grouping> for ReportGrouping {
    fn from(value: Grouping) -> Self {
        match value {
            Grouping::Supplier => ReportGrouping::Supplier,
            Grouping::Category => ReportGrouping::Category,
            Grouping::Date => ReportGrouping::Date,
        }
    }
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool).await.map_err(|e| {
                error!("Failed running migrations: {}", e);
                e
            })?;
        }

        Ok(Self {
            config,
            db: Arc::new(db_pool),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;
    let defaults = context.config.company_defaults;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Convert { quantity, from, to } => {
            let graph = MeasurementGraph::load(&*context.db).await?;
            let converted = graph.convert(quantity, from, to)?;
            render(cli.json, &Quantity::new(converted, to), |q| {
                format!("{} {} = {} {}", quantity, symbol(&graph, from), q.amount, symbol(&graph, to))
            })?;
        }
        Commands::Adjust {
            quantity,
            unit,
            force,
            supplier_rate,
        } => {
            let settings = load_company_settings(&*context.db, cli.company, &defaults).await?;
            let graph = MeasurementGraph::load(&*context.db).await?;
            let adjuster = QuantityAdjuster::new(&graph, &settings);
            let split = adjuster.split_adjusted_and_extra(
                quantity,
                unit,
                force || settings.is_adjust_quantity,
                supplier_rate,
            )?;
            render(cli.json, &split, |s| {
                format!(
                    "adjusted {} {}, extra {} {}",
                    s.adjusted.amount,
                    symbol(&graph, s.adjusted.measurement_id),
                    s.extra.amount,
                    symbol(&graph, s.extra.measurement_id)
                )
            })?;
        }
        Commands::Sync { plan } => {
            let raw = fs::read_to_string(&plan)
                .with_context(|| format!("failed to read order plan {}", plan.display()))?;
            let plan: OrderPlan = serde_json::from_str(&raw).context("invalid order plan")?;
            let service = AllocationSyncService::new(context.db.clone(), defaults);
            let summary = service.sync_order(&plan, cli.company).await?;
            info!(order_id = plan.order_id, "Sync finished");
            render(cli.json, &summary, |s| {
                format!(
                    "order {}: {} created, {} updated, {} unchanged, {} pruned, {} need manual allocation",
                    plan.order_id, s.created, s.updated, s.unchanged, s.pruned, s.needs_manual_allocation
                )
            })?;
        }
        Commands::Prune { order, functions } => {
            let service = AllocationSyncService::new(context.db.clone(), defaults);
            let pruned = service.prune(order, &functions).await?;
            render(cli.json, &pruned, |n| format!("order {}: {} allocations pruned", order, n))?;
        }
        Commands::Report { grouping, orders } => {
            let service = AllocationReportService::new(context.db.clone(), defaults);
            let filter = ReportFilter {
                order_ids: orders,
                ..Default::default()
            };
            let lines = service.report(grouping.into(), &filter, cli.company).await?;
            if cli.json {
                print_json(&lines)?;
            } else {
                let graph = MeasurementGraph::load(&*context.db).await?;
                for line in &lines {
                    println!(
                        "- {} • raw material {} • {} {} (+{} {} extra)",
                        line.group,
                        line.raw_material_id,
                        line.final_quantity.amount,
                        symbol(&graph, line.final_quantity.measurement_id),
                        line.extra_quantity.amount,
                        symbol(&graph, line.extra_quantity.measurement_id)
                    );
                }
            }
        }
    }

    Ok(())
}

fn symbol(graph: &MeasurementGraph, unit_id: i64) -> String {
    graph
        .unit(unit_id)
        .map(|u| u.symbol.clone())
        .unwrap_or_else(|_| format!("#{}", unit_id))
}

fn render<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        print_json(value)
    } else {
        println!("{}", text(value));
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
