use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use membank_config::AppConfig;
use membank_memory::{self as memory, Digest, DigestItem, Node, NodeChanges, digest};
use membank_runtime::{DaemonClient, GraphStore, ServerEvent, UpdateOutcome, run_daemon};

#[derive(Debug, Parser)]
#[command(
    name = "membank",
    version,
    about = "A live, editable graph over a directory of memory records"
)]
struct Cli {
    /// Workspace root containing the managed memory-bank directory.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Configuration file.
    #[arg(long, default_value = "membank.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the engine daemon: build the graph, watch the bank, serve clients.
    Start,
    /// Subscribe to a running daemon and print each snapshot as it arrives.
    View {
        /// Case-insensitive title filter.
        #[arg(long, default_value = "")]
        filter: String,
        /// Field to group the list by: type, status, or parent.
        #[arg(long, default_value = "type")]
        group_by: String,
    },
    /// One-shot build and summary of the bank, without a daemon.
    Build,
    /// Print one node, body included.
    Show { id: String },
    /// Apply a partial update to one node through the daemon.
    Set {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        readiness: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Print the progress digest mined from the progress node.
    Digest,
    /// Open a node's backing file in the configured editor.
    Open { id: String },
    Ping,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    // The daemon logs to a durable daily file so client-relayed diagnostics
    // survive the process; one-shot commands log to stderr.
    let _guard = init_tracing(&config, matches!(cli.command, Commands::Start));

    let client = DaemonClient::new(&config.daemon.socket_path);

    match cli.command {
        Commands::Start => run_daemon(config, &cli.root).await?,
        Commands::View { filter, group_by } => run_view(&client, filter, group_by).await?,
        Commands::Build => {
            let graph = memory::build(&cli.root, &config.bank.dir_name);
            print_summary(&graph);
        }
        Commands::Show { id } => {
            let graph = memory::build(&cli.root, &config.bank.dir_name);
            match graph.get(&id) {
                Some(node) => print_node(node),
                None => println!("no node with id {id:?}"),
            }
        }
        Commands::Set {
            id,
            title,
            status,
            readiness,
            body,
        } => {
            let changes = NodeChanges {
                title,
                status,
                readiness,
                body,
            };
            if changes.is_empty() {
                println!("nothing to change");
                return Ok(());
            }
            match client.update_node(&id, changes).await? {
                UpdateOutcome::Saved => println!("saved {id}"),
                UpdateOutcome::Rejected(reason) => println!("rejected: {reason}"),
                UpdateOutcome::Stale => println!("no such node in the current graph: {id}"),
            }
        }
        Commands::Digest => {
            let graph = memory::build(&cli.root, &config.bank.dir_name);
            let progress = graph
                .nodes
                .iter()
                .find(|node| node.kind == "progress")
                .or_else(|| graph.get("progress"));
            match progress.and_then(|node| node.body.as_deref()) {
                Some(body) => {
                    let subsystems: Vec<&Node> = graph
                        .nodes
                        .iter()
                        .filter(|node| node.kind == "subsystem")
                        .collect();
                    print_digest(&digest::extract(body, &subsystems));
                }
                None => println!("no progress node found"),
            }
        }
        Commands::Open { id } => client.open_file(&id).await?,
        Commands::Ping => {
            client.ping().await?;
            println!("pong");
        }
        Commands::Stop => {
            client.graceful_shutdown().await?;
            println!("shutdown requested");
        }
    }

    Ok(())
}

fn init_tracing(
    config: &AppConfig,
    daemon: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));
    if daemon {
        let appender = tracing_appender::rolling::daily(".membank/logs", "membank.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

async fn run_view(client: &DaemonClient, filter: String, group_by: String) -> Result<()> {
    client.connect_with_backoff(5).await?;

    let mut store = GraphStore::default();
    store.prefs.filter = filter;
    store.prefs.group_by = group_by;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscriber = client.clone();
    let feed = tokio::spawn(async move { subscriber.subscribe(tx).await });

    while let Some(event) = rx.recv().await {
        match event {
            ServerEvent::Init(payload) => {
                if !payload.exists {
                    println!(
                        "no memory bank at {}; create it to get started",
                        payload.bank_dir.display()
                    );
                    continue;
                }
                store.apply_init(payload);
                print_store(&store);
            }
            // The subscription stream carries only Init broadcasts.
            other => tracing::debug!(?other, "unhandled event in view mode"),
        }
    }

    feed.await??;
    Ok(())
}

fn print_store(store: &GraphStore) {
    println!("── {} nodes ──", store.nodes().len());
    for (group, nodes) in store.grouped() {
        println!("[{group}]");
        for node in nodes {
            let readiness = node
                .readiness
                .map(|r| format!(" {:>3.0}%", r * 100.0))
                .unwrap_or_default();
            println!("  {} ({}){readiness}", node.title, node.status);
        }
    }
}

fn print_summary(graph: &memory::Graph) {
    if !graph.exists {
        println!(
            "no memory bank at {}; create it to get started",
            graph.dir.display()
        );
        return;
    }
    println!("{} nodes in {}", graph.len(), graph.dir.display());
    for root in graph.roots() {
        print_tree(graph, root, 0);
    }
}

fn print_tree(graph: &memory::Graph, node: &Node, depth: usize) {
    println!("{}{} ({})", "  ".repeat(depth), node.title, node.status);
    // children, not parent links, are the traversal structure; a cycle in
    // parent references cannot trap this walk deeper than the child lists go.
    for child in &node.children {
        if let Some(child) = graph.get(child) {
            print_tree(graph, child, depth + 1);
        }
    }
}

fn print_node(node: &Node) {
    println!("id:        {}", node.id);
    println!("title:     {}", node.title);
    println!("type:      {}", node.kind);
    println!("status:    {}", node.status);
    match node.readiness {
        Some(readiness) => println!("readiness: {readiness}"),
        None => println!("readiness:"),
    }
    if let Some(parent) = &node.parent {
        println!("parent:    {parent}");
    }
    if !node.tags.is_empty() {
        println!("tags:      {}", node.tags.join(", "));
    }
    println!("file:      {}", node.file_path.display());
    if let Some(body) = &node.body {
        println!("\n{body}");
    }
}

fn print_digest(digest: &Digest) {
    for (name, items) in [
        ("Backlog", &digest.backlog),
        ("In Progress", &digest.in_progress),
        ("Done", &digest.done),
        ("Log", &digest.log),
    ] {
        if items.is_empty() {
            continue;
        }
        println!("## {name}");
        for item in items {
            print_digest_item(item);
        }
    }
    if digest.is_empty() {
        println!("nothing extracted");
    }
}

fn print_digest_item(item: &DigestItem) {
    let priority = item
        .priority
        .map(|p| format!("[{p:?}] "))
        .unwrap_or_default();
    let tags = if item.tags.is_empty() {
        String::new()
    } else {
        format!("  ({})", item.tags.join(", "))
    };
    println!("- {priority}{}{tags}", item.text);
}
