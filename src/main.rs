use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use craft_queue::agent::{install_signal_handlers, is_shutdown_requested, CliAgentBinding};
use craft_queue::bridge::AgentBridge;
use craft_queue::catalog::{EmptyCatalog, RecipeCatalog, TomlCatalog};
use craft_queue::config::{self, CraftQueueConfig, CONFIG_FILE_NAME};
use craft_queue::coordinator::{self, CoordinatorHandle, NewItem, QueueSnapshot};
use craft_queue::log::LogLevel;
use craft_queue::orchestrator::SessionState;
use craft_queue::scheduler;
use craft_queue::types::{DispatchMode, ItemId, RecipeEvent};
use craft_queue::{log_debug, log_info, log_warn};

#[derive(Parser)]
#[command(
    name = "craft-queue",
    about = "Queue crafts and hand them one at a time to an external crafting agent"
)]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/craft-queue.toml).
    /// When specified, the catalog path resolves from the config file's
    /// parent directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default craft-queue.toml
    Init,
    /// Check whether the agent answers and print its status
    Probe,
    /// Run the queue with an interactive console on stdin
    Run,
}

/// One line typed into the console.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
enum ConsoleCommand {
    /// Queue a recipe
    Add {
        recipe_id: u32,
        #[arg(default_value = "1", allow_negative_numbers = true)]
        quantity: i64,
        /// Display name (looked up in the catalog when omitted)
        #[arg(long)]
        name: Option<String>,
    },
    /// Queue the recipe selected in the crafting log
    AddSelected {
        #[arg(default_value = "1", allow_negative_numbers = true)]
        quantity: i64,
    },
    Remove {
        id: ItemId,
    },
    /// Move an item to a zero-based position
    Move {
        id: ItemId,
        index: usize,
    },
    /// Set an item's quantity
    Qty {
        id: ItemId,
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Set how many units of a material are high grade
    Hq {
        id: ItemId,
        material_id: u32,
        count: u32,
    },
    /// Return a failed or stopped item to pending
    Requeue {
        id: ItemId,
    },
    Clear,
    ClearCompleted,
    /// Start crafting from the first pending item
    Start {
        /// Craft one item and stop
        #[arg(long, conflicts_with = "all")]
        single: bool,
        /// Keep going until nothing is pending
        #[arg(long)]
        all: bool,
    },
    /// Craft one specific item
    StartOne {
        id: ItemId,
    },
    Stop,
    Pause,
    Resume,
    /// Simulate selecting a recipe in the crafting log
    Select {
        recipe_id: u32,
    },
    OpenLog,
    CloseLog,
    List,
    Status {
        #[arg(long)]
        json: bool,
    },
    Quit,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.log_level.parse::<LogLevel>() {
        Ok(level) => craft_queue::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let root = &cli.root;

    let (config_path, config_base) = match &cli.config {
        Some(p) => (
            Some(p.clone()),
            p.parent().unwrap_or(Path::new(".")).to_path_buf(),
        ),
        None => (None, root.to_path_buf()),
    };

    let result = match cli.command {
        Commands::Init => handle_init(root),
        Commands::Probe => handle_probe(root, config_path.as_deref()).await,
        Commands::Run => handle_run(root, config_path.as_deref(), &config_base).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn handle_init(root: &Path) -> Result<(), String> {
    fs::create_dir_all(root).map_err(|e| format!("Failed to create {}: {}", root.display(), e))?;

    let config_path = root.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        println!("{} already exists, leaving it alone.", config_path.display());
        return Ok(());
    }

    fs::write(&config_path, config::default_config_toml())
        .map_err(|e| format!("Failed to write {}: {}", config_path.display(), e))?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

fn build_bridge(config: &CraftQueueConfig) -> AgentBridge<CliAgentBinding> {
    let binding = CliAgentBinding::new(&config.agent.program, config.agent.args.clone());
    AgentBridge::new(binding, config.call_timeout())
}

fn load_catalog(
    config: &CraftQueueConfig,
    config_base: &Path,
) -> Result<Arc<dyn RecipeCatalog>, String> {
    match &config.catalog.path {
        Some(path) => {
            let catalog = TomlCatalog::load(&config_base.join(path))?;
            log_info!("Loaded {} recipe(s) from catalog", catalog.len());
            Ok(Arc::new(catalog))
        }
        None => Ok(Arc::new(EmptyCatalog)),
    }
}

async fn handle_probe(root: &Path, config_path: Option<&Path>) -> Result<(), String> {
    let config = config::load_config_from(config_path, root)?;
    let mut bridge = build_bridge(&config);

    if !bridge.probe().await {
        println!("Agent '{}' is not available.", config.agent.program);
        return Ok(());
    }
    let status = bridge.refresh_status().await;
    println!("Agent '{}' is available.", config.agent.program);
    println!("  busy:         {}", status.busy);
    println!("  list running: {}", status.list_running);
    println!("  paused:       {}", status.paused);
    Ok(())
}

async fn handle_run(
    root: &Path,
    config_path: Option<&Path>,
    config_base: &Path,
) -> Result<(), String> {
    let config = config::load_config_from(config_path, root)?;
    let catalog = load_catalog(&config, config_base)?;

    install_signal_handlers()?;

    let (coord_handle, coord_task) = coordinator::spawn_coordinator(
        build_bridge(&config),
        catalog,
        config.policy(),
        config.default_mode(),
    );

    // Set up cancellation for graceful shutdown
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Spawn shutdown monitor that watches for signal and cancels
    tokio::spawn(async move {
        loop {
            if is_shutdown_requested() {
                cancel_clone.cancel();
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    });

    let mut changes = coord_handle.subscribe();
    let watch_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = watch_cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    log_debug!("[console] Queue revision {}", *changes.borrow_and_update());
                }
            }
        }
    });

    let scheduler_task = tokio::spawn(scheduler::run_scheduler(
        coord_handle.clone(),
        config.polling_interval(),
        cancel.clone(),
    ));

    log_info!(
        "Polling '{}' every {} ms. Type 'help' for commands.",
        config.agent.program,
        config.polling_interval().as_millis()
    );

    run_console(&coord_handle, &cancel).await;

    cancel.cancel();
    let summary = scheduler_task
        .await
        .map_err(|e| format!("Scheduler task failed: {}", e))?;
    log_info!(
        "Stopped after {} tick(s), {} session(s) finished ({:?})",
        summary.ticks,
        summary.sessions_finished,
        summary.halt_reason
    );

    drop(coord_handle);
    if let Err(err) = coord_task.await {
        log_warn!("Coordinator task panicked: {:?}", err);
    }
    Ok(())
}

/// Read stdin on a plain thread so a pending read never holds up shutdown.
/// The thread is left blocked when the console stops; process exit reaps it.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<std::io::Result<String>>, String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| format!("Failed to spawn stdin reader: {}", e))?;
    Ok(rx)
}

async fn run_console(handle: &CoordinatorHandle, cancel: &CancellationToken) {
    let mut lines = match spawn_stdin_reader() {
        Ok(rx) => rx,
        Err(e) => {
            log_warn!("[console] {}", e);
            // No console; run until a signal arrives
            cancel.cancelled().await;
            return;
        }
    };

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let line = match line {
            Some(Ok(line)) => line,
            None => break,
            Some(Err(e)) => {
                log_warn!("[console] Failed to read stdin: {}", e);
                break;
            }
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let command = match ConsoleLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        if let Err(e) = run_console_command(handle, command).await {
            println!("Error: {}", e);
        }
    }
}

async fn run_console_command(
    handle: &CoordinatorHandle,
    command: ConsoleCommand,
) -> Result<(), String> {
    match command {
        ConsoleCommand::Add {
            recipe_id,
            quantity,
            name,
        } => {
            let id = handle
                .add_item(NewItem {
                    display_name: name,
                    ..NewItem::new(recipe_id, quantity)
                })
                .await
                .map_err(|e| e.to_string())?;
            println!("Added {}", id);
        }
        ConsoleCommand::AddSelected { quantity } => {
            let id = handle
                .add_selected(quantity)
                .await
                .map_err(|e| e.to_string())?;
            println!("Added {}", id);
        }
        ConsoleCommand::Remove { id } => handle.remove_item(id).await.map_err(|e| e.to_string())?,
        ConsoleCommand::Move { id, index } => handle
            .move_item(id, index)
            .await
            .map_err(|e| e.to_string())?,
        ConsoleCommand::Qty { id, quantity } => handle
            .set_quantity(id, quantity)
            .await
            .map_err(|e| e.to_string())?,
        ConsoleCommand::Hq {
            id,
            material_id,
            count,
        } => handle
            .set_high_grade(id, material_id, count)
            .await
            .map_err(|e| e.to_string())?,
        ConsoleCommand::Requeue { id } => handle.requeue_item(id).await.map_err(|e| e.to_string())?,
        ConsoleCommand::Clear => handle.clear_queue().await.map_err(|e| e.to_string())?,
        ConsoleCommand::ClearCompleted => {
            let removed = handle.clear_completed().await.map_err(|e| e.to_string())?;
            println!("Removed {} completed item(s)", removed);
        }
        ConsoleCommand::Start { single, all } => {
            let mode = match (single, all) {
                (true, _) => Some(DispatchMode::Single),
                (_, true) => Some(DispatchMode::SequentialAll),
                _ => None,
            };
            let id = handle.start(mode).await.map_err(|e| e.to_string())?;
            println!("Crafting {}", id);
        }
        ConsoleCommand::StartOne { id } => {
            handle.start_single(id).await.map_err(|e| e.to_string())?;
            println!("Crafting {}", id);
        }
        ConsoleCommand::Stop => handle.stop().await.map_err(|e| e.to_string())?,
        ConsoleCommand::Pause => handle.pause().await.map_err(|e| e.to_string())?,
        ConsoleCommand::Resume => handle.resume().await.map_err(|e| e.to_string())?,
        ConsoleCommand::Select { recipe_id } => {
            handle
                .recipe_event(RecipeEvent::RecipeChanged(recipe_id))
                .await
                .map_err(|e| e.to_string())?;
        }
        ConsoleCommand::OpenLog => {
            handle
                .recipe_event(RecipeEvent::LogOpened)
                .await
                .map_err(|e| e.to_string())?;
        }
        ConsoleCommand::CloseLog => {
            handle
                .recipe_event(RecipeEvent::LogClosed)
                .await
                .map_err(|e| e.to_string())?;
        }
        ConsoleCommand::List => {
            let snapshot = handle.get_snapshot().await.map_err(|e| e.to_string())?;
            print_items(&snapshot);
        }
        ConsoleCommand::Status { json } => {
            let snapshot = handle.get_snapshot().await.map_err(|e| e.to_string())?;
            if json {
                let rendered = serde_json::to_string_pretty(&snapshot)
                    .map_err(|e| format!("Failed to render status: {}", e))?;
                println!("{}", rendered);
            } else {
                print_status(&snapshot);
            }
        }
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn print_items(snapshot: &QueueSnapshot) {
    if snapshot.items.is_empty() {
        println!("Queue is empty.");
        return;
    }

    println!("{:<4} {:<6} {:<10} {:<6} NAME", "POS", "ID", "STATUS", "QTY");
    println!("{}", "-".repeat(48));
    for (pos, item) in snapshot.items.iter().enumerate() {
        println!(
            "{:<4} {:<6} {:<10} {:<6} {}",
            pos,
            item.id.to_string(),
            item.status.to_string(),
            item.quantity,
            item.display_name
        );
        for material in item.materials.iter().filter(|m| m.high_grade > 0) {
            println!(
                "{:<28} {} x{} HQ / x{} NQ",
                "", material.name, material.high_grade, material.low_grade
            );
        }
    }
}

fn print_status(snapshot: &QueueSnapshot) {
    let agent = &snapshot.agent;
    if agent.available {
        println!(
            "Agent: available (busy={}, list_running={}, paused={})",
            agent.busy, agent.list_running, agent.paused
        );
    } else {
        println!("Agent: not available");
    }

    match snapshot.session {
        SessionState::Idle => println!("Session: idle"),
        SessionState::Dispatching {
            active_item_id,
            mode,
        } => println!("Session: crafting {} ({})", active_item_id, mode),
    }

    match snapshot.selected_recipe {
        Some(id) => println!("Selected recipe: {}", id),
        None if snapshot.log_open => println!("Crafting log open, nothing selected"),
        None => println!("Crafting log closed"),
    }
    println!("{} item(s) queued", snapshot.items.len());
}
