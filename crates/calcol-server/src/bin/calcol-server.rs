//! Calcol Server CLI
//!
//! A thin wrapper around the calcol-server library.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

#[derive(Parser)]
#[command(name = "calcol-server")]
#[command(about = "Calculated column server")]
#[command(after_help = "\
EXAMPLES:
    # Serve a parquet file, row ids from positions
    calcol-server ./orders.parquet

    # Use an integer column as row ids and preload formulas
    calcol-server --id-column order_id --formulas ./totals.calc ./orders.csv

    # totals.calc:
    #   subtotal = price * quantity
    #   total = subtotal * (1 + taxRate)

    # Recompute whenever the data file changes
    calcol-server --watch ./orders.parquet
")]
struct Args {
    /// Path to a parquet/csv/ipc file
    path: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Integer column used as row ids instead of row positions
    #[arg(long)]
    id_column: Option<String>,

    /// File of `column = formula` lines added at start-up
    #[arg(long)]
    formulas: Option<PathBuf>,

    /// Reload the data file and recompute when it changes
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let dataset = calcol_server::loader::load_dataset(&args.path, args.id_column.as_deref())
        .await
        .with_context(|| format!("Loading {}", args.path.display()))?;
    let core = Arc::new(calcol_server::ServerCore::from_dataset(dataset));

    if let Some(path) = &args.formulas {
        let specs = calcol_server::formulas::read_formulas(path)?;
        core.load_formulas(specs)
            .await
            .with_context(|| format!("Adding formulas from {}", path.display()))?;
    }

    #[cfg(feature = "file-watcher")]
    let _watcher = if args.watch {
        Some(calcol_server::watcher::FileWatcher::new(
            core.clone(),
            args.path.clone(),
            args.id_column.clone(),
        )?)
    } else {
        None
    };

    #[cfg(not(feature = "file-watcher"))]
    if args.watch {
        anyhow::bail!("--watch requires the file-watcher feature");
    }

    let router = calcol_server::build_router_with_docs(core);

    let addr = format!("{}:{}", args.host, args.port);
    println!("Starting server on {}", addr);
    println!("  POST   /parse - Parse a formula");
    println!("  GET    /calculations - List calculations");
    println!("  POST   /calculations - Add a calculation");
    println!("  GET    /calculations/{{column}} - Show a calculation");
    println!("  PATCH  /calculations/{{column}} - Update a calculation");
    println!("  DELETE /calculations/{{column}} - Remove a calculation");
    println!("  POST   /execute - Recompute all calculations");
    println!("  POST   /refresh - Recompute stale calculations");
    println!("  GET    /columns - List columns");
    println!("  GET    /virtual-columns - Calculated results");
    println!("  GET    /subscribe - SSE change notifications");
    println!("  GET    /swagger-ui - API documentation");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
