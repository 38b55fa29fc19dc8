// ============================================================================
// dashboard-tx: CLI for the appchain dashboard transaction store
// ============================================================================
// Usage:
//   dashboard-tx list [--from A] [--appchain ID] [--status S]   List transactions
//   dashboard-tx stats                                          Per-status counts
//   dashboard-tx clear --yes                                    Clear the active network
//   dashboard-tx export --format json                           Export as JSON
//   dashboard-tx locale [VALUE]                                 Show or set the locale
//   dashboard-tx bridge --appchain ID --from A --to R --amount N  Bridge OCT to an appchain
//   dashboard-tx resume <CALLBACK_URL>                          Resume a wallet redirect
//   dashboard-tx watch [--from A] [--appchain ID]               Reconcile pending records
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use dashboard_core::units::{format_amount, parse_amount, OCT_DECIMALS};
use dashboard_core::{
    ChainContext, ChangeCall, DashboardConfig, LogNotifier, MemoryPersistence, NetworkConfig,
    Notification, Notifier, Persistence, RedbPersistence, Reconciler, ResumeOutcome, SubmitOutcome,
    TxDraft, TxFilter, TxRecord, TxStatus, TxStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Appchain dashboard transaction tool
#[derive(Parser)]
#[command(name = "dashboard-tx", version, about = "Inspect and reconcile appchain bridge transactions")]
struct Cli {
    /// Path to the database file (default: ~/.appchain-dashboard/dashboard.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Network partition to operate on: mainnet, testnet (default: DASHBOARD_NETWORK or testnet)
    #[arg(long, global = true)]
    network: Option<String>,

    /// Keep state in memory only; nothing is written to disk
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List transactions of the active network, newest first
    List {
        /// Only transactions sent by this account
        #[arg(long)]
        from: Option<String>,

        /// Only transactions of this appchain
        #[arg(long)]
        appchain: Option<String>,

        /// Filter by status: loading, success, error, timed-out
        #[arg(long)]
        status: Option<String>,
    },

    /// Show per-status counts for the active network
    Stats,

    /// Remove every transaction of the active network
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Export the active network's transactions and pending intents
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show the locale preference, or set it when VALUE is given
    Locale { value: Option<String> },

    /// Send OCT to an appchain account; prints the wallet URL to sign at
    Bridge {
        /// Destination appchain id
        #[arg(long)]
        appchain: String,

        /// NEAR account that signs and pays
        #[arg(long)]
        from: String,

        /// Receiver address on the appchain
        #[arg(long)]
        to: String,

        /// Amount in OCT, e.g. 1.5
        #[arg(long)]
        amount: String,
    },

    /// Resume a wallet redirect from the callback URL and watch the result
    Resume { callback_url: String },

    /// Reconcile pending transactions until they settle (Ctrl-C to stop)
    Watch {
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        appchain: Option<String>,
    },
}

/// Prints every notification as a status line
struct PrintNotifier;

impl Notifier for PrintNotifier {
    fn notify(&self, n: &Notification) {
        println!(
            "[{:<8}] {}  {} - {}",
            n.status.as_str(),
            short_hash(&n.hash),
            n.title,
            n.summary
        );
        LogNotifier.notify(n);
    }
}

fn parse_status(s: &str) -> Result<TxStatus> {
    TxStatus::parse(s).ok_or_else(|| {
        anyhow!(
            "Unknown status '{}'. Valid values: loading, success, error, timed-out",
            s
        )
    })
}

fn format_timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ms))
}

fn short_hash(hash: &str) -> String {
    if hash.chars().count() <= 12 {
        return hash.to_string();
    }
    let head: String = hash.chars().take(6).collect();
    let tail: String = hash.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{}..{}", head, tail)
}

fn init_logging(verbose: bool) -> Result<()> {
    let mut filter = EnvFilter::from_default_env();
    if verbose {
        for directive in ["dashboard_core=debug", "dashboard_tx=info"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<DashboardConfig> {
    DashboardConfig::from_lookup(|key| match (key, &cli.network) {
        ("DASHBOARD_NETWORK", Some(network)) => Some(network.clone()),
        _ => std::env::var(key).ok(),
    })
}

fn open_store(cli: &Cli, config: &DashboardConfig) -> Result<Arc<TxStore>> {
    let backend: Arc<dyn Persistence> = if cli.ephemeral {
        info!("Using in-memory storage");
        Arc::new(MemoryPersistence::new())
    } else {
        let path = cli
            .db_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| config.db_path.clone());
        Arc::new(RedbPersistence::open(path.as_deref())?)
    };
    Ok(Arc::new(TxStore::open(backend, config.network.network_id.clone())))
}

fn reconciler(config: &DashboardConfig, store: Arc<TxStore>) -> Result<Reconciler> {
    let context = ChainContext::connect(config.network.clone())?;
    Ok(Reconciler::new(
        context,
        store,
        Arc::new(PrintNotifier),
        config.reconcile.clone(),
    ))
}

/// Draft and `ft_transfer_call` for an OCT transfer onto `appchain`
fn bridge_request(
    network: &NetworkConfig,
    appchain: &str,
    from: &str,
    to: &str,
    amount: &str,
) -> Result<(TxDraft, ChangeCall)> {
    let raw = parse_amount(amount, OCT_DECIMALS).map_err(|e| anyhow!("Invalid amount '{}': {}", amount, e))?;
    if raw == 0 {
        anyhow::bail!("Amount must be greater than zero");
    }
    if to.trim().is_empty() {
        anyhow::bail!("Receiver address must not be empty");
    }

    let call = ChangeCall::bridge_to_appchain(
        &network.token_contract_id,
        &network.anchor_contract_id(appchain),
        to,
        raw,
    );
    let summary = format!("Transfer {} OCT to {}", format_amount(raw, OCT_DECIMALS), to);
    Ok((TxDraft::new("Transfer Asset", summary, from, appchain), call))
}

fn scope(from: Option<String>, appchain_id: Option<String>) -> TxFilter {
    TxFilter {
        from,
        appchain_id,
        status: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if cli.verbose {
            eprintln!("Warning: Could not load .env file: {}", e);
        }
    }
    init_logging(cli.verbose)?;

    let config = load_config(&cli)?;
    let store = open_store(&cli, &config)?;

    match cli.command {
        Commands::List {
            from,
            appchain,
            status,
        } => {
            let mut filter = scope(from, appchain);
            filter.status = status.as_deref().map(parse_status).transpose()?;
            cmd_list(&store, &filter).await
        }
        Commands::Stats => cmd_stats(&store).await,
        Commands::Clear { yes } => cmd_clear(&store, yes).await,
        Commands::Export { format } => cmd_export(&store, &format).await,
        Commands::Locale { value } => cmd_locale(&store, value).await,
        Commands::Bridge {
            appchain,
            from,
            to,
            amount,
        } => {
            let (draft, call) = bridge_request(&config.network, &appchain, &from, &to, &amount)?;
            cmd_bridge(&reconciler(&config, store)?, draft, call).await
        }
        Commands::Resume { callback_url } => {
            cmd_resume(&reconciler(&config, store)?, &callback_url).await
        }
        Commands::Watch { from, appchain } => {
            cmd_watch(&reconciler(&config, store)?, &scope(from, appchain)).await
        }
    }
}

fn print_records(records: &[TxRecord]) {
    println!(
        "{:<16}  {:<8}  {:<23}  {:<20}  {:<10}  {}",
        "HASH", "STATUS", "ADDED", "FROM", "APPCHAIN", "MESSAGE"
    );
    println!("{}", "-".repeat(110));

    for record in records {
        let from = record.from.chars().take(20).collect::<String>();
        println!(
            "{:<16}  {:<8}  {:<23}  {:<20}  {:<10}  {}",
            short_hash(&record.hash),
            record.status.as_str(),
            format_timestamp(record.added_time),
            from,
            record.appchain_id,
            record.message
        );
    }
}

async fn cmd_list(store: &TxStore, filter: &TxFilter) -> Result<()> {
    let records = store.list_filtered(filter).await;
    if records.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    print_records(&records);
    println!("\nTotal: {} transactions", records.len());
    Ok(())
}

async fn cmd_stats(store: &TxStore) -> Result<()> {
    let stats = store.stats().await;

    println!("=== Appchain Dashboard Transaction Stats ===");
    println!("Network:      {}", stats.network);
    println!();
    println!("Transactions: {} total", stats.total);
    for (status, count) in &stats.by_status {
        println!("  {:10} {}", status, count);
    }
    println!("Pending wallet intents: {}", stats.pending_intents);

    let others: Vec<String> = store
        .networks()
        .await
        .into_iter()
        .filter(|n| n.as_str() != stats.network)
        .map(|n| n.to_string())
        .collect();
    if !others.is_empty() {
        println!("Other partitions: {}", others.join(", "));
    }
    Ok(())
}

async fn cmd_clear(store: &TxStore, yes: bool) -> Result<()> {
    let network = store.active_network().await;
    let count = store.list().await.len();

    if !yes {
        println!(
            "Would clear {} transactions on {}. Re-run with --yes to confirm.",
            count, network
        );
        return Ok(());
    }

    store.clear().await;
    println!("Cleared {} transactions on {}", count, network);
    Ok(())
}

async fn cmd_export(store: &TxStore, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "network": store.active_network().await,
        "stats": store.stats().await,
        "locale": store.locale().await,
        "transactions": store.list().await,
        "intents": store.intents().await,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

async fn cmd_locale(store: &TxStore, value: Option<String>) -> Result<()> {
    match value {
        Some(locale) => {
            let locale = locale.trim();
            if locale.is_empty() {
                anyhow::bail!("Locale must not be empty");
            }
            store.set_locale(locale).await;
            println!("Locale set to {}", locale);
        }
        None => match store.locale().await {
            Some(locale) => println!("{}", locale),
            None => println!("(not set)"),
        },
    }
    Ok(())
}

async fn wait_or_interrupt(reconciler: &Reconciler) {
    tokio::select! {
        _ = reconciler.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted; unsettled transactions stay loading.");
        }
    }
    reconciler.shutdown();
}

async fn cmd_bridge(reconciler: &Reconciler, draft: TxDraft, call: ChangeCall) -> Result<()> {
    let summary = draft.summary.clone();
    let outcome = reconciler
        .submit(draft, call)
        .await
        .map_err(|e| anyhow!("Bridge transfer rejected: {}", e))?;

    match outcome {
        SubmitOutcome::Redirect { intent_id, url } => {
            println!("{}", summary);
            println!("Sign in the wallet (intent {}):", intent_id);
            println!("  {}", url);
            println!();
            println!("Then run: dashboard-tx resume '<callback URL>'");
        }
        SubmitOutcome::Tracking { hash } => {
            println!("Tracking {}. Press Ctrl-C to stop.", hash);
            wait_or_interrupt(reconciler).await;
            if let Some(record) = reconciler.store().get(&hash).await {
                println!();
                print_records(&[record]);
            }
        }
    }
    Ok(())
}

async fn cmd_resume(reconciler: &Reconciler, callback_url: &str) -> Result<()> {
    match reconciler.resume_from_redirect(callback_url).await? {
        ResumeOutcome::Tracking(records) => {
            println!("Tracking {} transaction(s). Press Ctrl-C to stop.", records.len());
            wait_or_interrupt(reconciler).await;

            let mut settled = Vec::with_capacity(records.len());
            for record in &records {
                settled.push(reconciler.store().get(&record.hash).await.unwrap_or_else(|| record.clone()));
            }
            println!();
            print_records(&settled);
        }
        ResumeOutcome::Rejected { intent, message } => {
            println!(
                "Wallet did not sign {} on {}: {}",
                intent.method_name, intent.contract_id, message
            );
        }
    }
    Ok(())
}

async fn cmd_watch(reconciler: &Reconciler, filter: &TxFilter) -> Result<()> {
    let started = reconciler.reconcile(filter).await;
    if started == 0 {
        println!("No pending transactions to watch.");
        return Ok(());
    }

    println!("Watching {} pending transaction(s). Press Ctrl-C to stop.", started);
    wait_or_interrupt(reconciler).await;

    println!();
    print_records(&reconciler.store().list_filtered(filter).await);
    Ok(())
}
