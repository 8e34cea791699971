//! Scenario planner: derive optimistic/pessimistic projections and manage saved states.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use scenario_planner::api::{run_http_server, shared_store};
use scenario_planner::core::{CalculatorKind, ScenarioData, recalculate};
use scenario_planner::format::{format_currency, format_multiple, format_percentage};
use scenario_planner::store::{CalculatorState, FileStore, KeyValueStore, StateStore};
use scenario_planner::transfer::{DirectorySink, ExportSink, export_state, import_data};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "scenario-planner")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the persisted state collection
    #[arg(
        long,
        global = true,
        env = "SCENARIO_STORE_DIR",
        default_value = ".scenario-planner"
    )]
    store_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "SCENARIO_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(short, long, env = "SCENARIO_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Recalculate a scenario file (or the built-in template) and print it
    Derive {
        /// ScenarioData JSON file; the template is used when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Save the result as a state with this name
        #[arg(long)]
        save: Option<String>,
        /// Print a formatted summary instead of JSON
        #[arg(long)]
        summary: bool,
    },
    /// Inspect or modify saved states
    States {
        #[command(subcommand)]
        action: StatesAction,
    },
    /// Write a saved state to an import/export file
    Export {
        id: String,
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Import an exported file as a new saved state
    Import {
        file: PathBuf,
        /// Calculator type the file must carry
        #[arg(short = 't', long = "type", default_value = ScenarioData::CALCULATOR_TYPE)]
        calculator_type: String,
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum StatesAction {
    /// List saved states, newest first when filtered by type
    List {
        #[arg(short = 't', long = "type")]
        calculator_type: Option<String>,
    },
    Show {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Remove every saved state
    Clear,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let backend: Box<dyn KeyValueStore> = Box::new(FileStore::open(&cli.store_dir)?);
    let store = StateStore::new(backend);
    info!(store_dir = %cli.store_dir.display(), "state store opened");

    match cli.command {
        Command::Serve { port } => run_http_server(port, shared_store(store)).await?,
        Command::Derive {
            input,
            save,
            summary,
        } => {
            let data = match input {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path).await?;
                    ScenarioData::from_request(serde_json::from_str(&raw)?)?
                }
                None => ScenarioData::default(),
            };
            let derived = recalculate(&data)?;
            if let Some(name) = save {
                let state = CalculatorState::for_payload(name, &derived)?;
                store.save_state(&state)?;
                info!(id = %state.id, "saved derived scenarios");
            }
            if summary {
                print_summary(&derived);
            } else {
                println!("{}", serde_json::to_string_pretty(&derived)?);
            }
        }
        Command::States { action } => run_states_action(&store, action)?,
        Command::Export { id, out_dir } => {
            let state = store
                .get_state(&id)
                .ok_or_else(|| format!("no saved state with id `{id}`"))?;
            let path = DirectorySink::new(out_dir).deliver(&export_state(&state)?)?;
            println!("{}", path.display());
        }
        Command::Import {
            file,
            calculator_type,
            name,
        } => {
            let reader = tokio::fs::File::open(&file).await?;
            let data = import_data(reader, &calculator_type).await?;
            let name = name.unwrap_or_else(|| {
                file.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("Imported {calculator_type}"))
            });
            let state = CalculatorState::new(name, calculator_type, data);
            store.save_state(&state)?;
            println!("{}", state.id);
        }
    }

    Ok(())
}

fn run_states_action<S: KeyValueStore>(
    store: &StateStore<S>,
    action: StatesAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        StatesAction::List { calculator_type } => {
            let states = match calculator_type.as_deref() {
                Some(calculator_type) => store.get_states_by_type(calculator_type),
                None => store.get_all_states(),
            };
            for state in states {
                let when = chrono::DateTime::from_timestamp_millis(state.timestamp)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| state.timestamp.to_string());
                println!(
                    "{}\t{}\t{}\t{}",
                    state.id, state.calculator_type, when, state.name
                );
            }
        }
        StatesAction::Show { id } => {
            let state = store
                .get_state(&id)
                .ok_or_else(|| format!("no saved state with id `{id}`"))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        StatesAction::Delete { id } => store.delete_state(&id)?,
        StatesAction::Clear => store.clear_all_states()?,
    }
    Ok(())
}

fn print_summary(data: &ScenarioData) {
    for scenario in data.scenarios.iter() {
        let m = &scenario.metrics;
        println!(
            "{:<18} p={:<6} revenue {:>14}  profit {:>14}  share {:>7}  growth {:>7}",
            scenario.name,
            format_percentage(scenario.probability * 100.0, 0),
            format_currency(m.expected_revenue),
            format_currency(m.expected_profit),
            format_percentage(m.market_share, 2),
            format_percentage(m.customer_growth, 1),
        );
    }
    for (metric, adjustment) in &data.adjustments {
        println!(
            "{:<18} optimistic {:>7}  pessimistic {:>7}",
            metric,
            format_multiple(adjustment.optimistic_multiplier),
            format_multiple(adjustment.pessimistic_multiplier),
        );
    }
    let aggregate = &data.metrics;
    println!(
        "probability total {}",
        format_percentage(data.scenarios.probability_sum() * 100.0, 0)
    );
    println!(
        "expected revenue {}  expected profit {}  market share {} to {}  growth {} to {}",
        format_currency(aggregate.expected_revenue),
        format_currency(aggregate.expected_profit),
        format_percentage(aggregate.market_share_range.min, 2),
        format_percentage(aggregate.market_share_range.max, 2),
        format_percentage(aggregate.customer_growth_range.min, 1),
        format_percentage(aggregate.customer_growth_range.max, 1),
    );
}
