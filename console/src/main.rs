use clap::{Parser, Subcommand};
use console::report::{format_history, format_order_list, format_outcome, history_json};
use console::watch::{parse_line, WatchCommand};
use console::DataFile;
use dispatcher::history::RECENT_ENTRIES;
use dispatcher::store::DispatchMeta;
use dispatcher::{test_connection, Dispatcher, Engine, Trigger};
use log::{error, info, warn};
use shared::{FileSettings, OrderId, Settings, SettingsProvider, COMPLETED_STATUS};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file with the RCON server list
    #[arg(short, long, default_value = "settings.json")]
    settings: PathBuf,

    /// Data file with orders, products and dispatch history
    #[arg(short, long, default_value = "orders.json")]
    data: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, authenticate and run one command against a server
    Probe {
        /// Index of a configured server
        #[arg(long, default_value = "0", conflicts_with = "host")]
        server: usize,

        /// Probe an unsaved server instead
        #[arg(long, requires = "secret")]
        host: Option<String>,

        #[arg(long, default_value = "2457")]
        port: u16,

        #[arg(long)]
        secret: Option<String>,

        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Command to run, `status` when omitted
        #[arg(long)]
        command: Option<String>,
    },
    /// Resend an order's commands regardless of its sent flag
    Send { order_id: OrderId },
    /// Clear an order's sent flag without sending
    Reset { order_id: OrderId },
    /// Show an order's dispatch history
    History {
        order_id: OrderId,

        #[arg(short, long, default_value_t = RECENT_ENTRIES)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
    /// List orders with their dispatch state
    Status,
    /// Mark an order completed, dispatching its commands
    Complete { order_id: OrderId },
    /// Read status changes from stdin and dispatch them until EOF or Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let provider = FileSettings::new(&args.settings);
    let loaded = provider.load();

    let default_filter = match &loaded {
        Ok(settings) if settings.debug => "debug",
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match args.command {
        Command::Probe {
            server,
            host,
            port,
            secret,
            timeout,
            command,
        } => {
            let result = match (host, secret) {
                (Some(host), Some(secret)) => {
                    test_connection(&host, port, &secret, timeout, command.as_deref()).await
                }
                _ => {
                    let settings = loaded?;
                    let Some(target) = settings.servers.get(server) else {
                        return Err(format!("no configured server #{}", server).into());
                    };
                    test_connection(
                        &target.host,
                        target.port,
                        &target.secret,
                        target.timeout_secs,
                        command.as_deref(),
                    )
                    .await
                }
            };

            match result {
                Ok(snippet) => println!("OK: {}", snippet),
                Err(e) => {
                    println!("FAILED: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Send { order_id } => {
            let mut data = DataFile::open(&args.data)?;
            let dispatcher = dispatcher_for(&args.settings, &data);
            let outcome = dispatcher.dispatch(order_id, Trigger::Manual).await;
            print!("{}", format_outcome(order_id, &outcome));
            data.save()?;
        }
        Command::Reset { order_id } => {
            let mut data = DataFile::open(&args.data)?;
            dispatcher_for(&args.settings, &data).reset(order_id);
            data.save()?;
            println!("Order {}: dispatch status reset", order_id);
        }
        Command::History {
            order_id,
            limit,
            json,
        } => {
            let data = DataFile::open(&args.data)?;
            let history = data.orders().history(order_id);
            if json {
                println!("{}", history_json(&history, limit)?);
            } else {
                print!("{}", format_history(&history, limit));
            }
        }
        Command::Status => {
            let data = DataFile::open(&args.data)?;
            print!("{}", format_order_list(&data.orders()));
        }
        Command::Complete { order_id } => {
            let mut data = DataFile::open(&args.data)?;
            let Some(old_status) = data.orders().set_status(order_id, COMPLETED_STATUS) else {
                return Err(format!("order {} not found", order_id).into());
            };

            let dispatcher = dispatcher_for(&args.settings, &data);
            if let Some(outcome) = dispatcher
                .on_order_status_changed(order_id, &old_status, COMPLETED_STATUS)
                .await
            {
                print!("{}", format_outcome(order_id, &outcome));
            }
            data.save()?;
        }
        Command::Watch => {
            let settings = loaded?;
            let mut data = DataFile::open(&args.data)?;
            watch(&args.settings, &settings, &mut data).await?;
        }
    }

    Ok(())
}

fn dispatcher_for(settings: &Path, data: &DataFile) -> Dispatcher {
    Dispatcher::new(
        Arc::new(FileSettings::new(settings)),
        data.orders(),
        data.catalog(),
    )
}

async fn watch(
    settings_path: &Path,
    settings: &Settings,
    data: &mut DataFile,
) -> Result<(), Box<dyn std::error::Error>> {
    let orders = data.orders();
    let engine = Engine::new(
        Arc::new(FileSettings::new(settings_path)),
        orders.clone(),
        data.catalog(),
    );

    info!(
        "Watching stdin with {} servers configured, auto retry {}",
        settings.servers.len(),
        if settings.auto_retry { "on" } else { "off" }
    );
    if !engine.dispatcher().verify_reachability().await {
        warn!("No configured server answered; dispatches will fail until one does");
    }

    let handle = engine.handle();
    let running = tokio::spawn(engine.run());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match parse_line(&line) {
                    Ok(WatchCommand::StatusChanged { order_id, old_status, new_status }) => {
                        if orders.set_status(order_id, &new_status).is_none() {
                            warn!("Order {} not found in {}", order_id, data.path().display());
                        }
                        handle.status_changed(order_id, &old_status, &new_status);
                    }
                    Ok(WatchCommand::Resend(order_id)) => {
                        let resend = handle.clone();
                        tokio::spawn(async move {
                            if let Some(outcome) = resend.resend(order_id).await {
                                print!("{}", format_outcome(order_id, &outcome));
                            }
                        });
                    }
                    Ok(WatchCommand::Reset(order_id)) => {
                        handle.reset(order_id);
                    }
                    Err(e) => error!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    handle.shutdown();
    if let Err(e) = running.await {
        error!("Dispatch engine panicked: {}", e);
    }
    data.save()?;

    Ok(())
}
