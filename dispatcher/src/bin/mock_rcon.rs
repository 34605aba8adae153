use clap::Parser;
use dispatcher::mock::{MockConfig, MockRconServer};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Local RCON server answering every command with ok")]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "2457")]
    port: u16,

    /// Secret clients must authenticate with
    #[arg(short, long)]
    secret: String,

    /// Command prefix answered with a malformed frame (repeatable)
    #[arg(long = "fail")]
    failing: Vec<String>,

    /// Command prefix never answered (repeatable)
    #[arg(long = "silent")]
    silent: Vec<String>,

    /// Delay before every command reply, in milliseconds
    #[arg(long, default_value = "0")]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = MockConfig::new(&args.secret).with_delay(Duration::from_millis(args.delay_ms));
    for prefix in &args.failing {
        config = config.failing(prefix);
    }
    for prefix in &args.silent {
        config = config.silent(prefix);
    }

    let address = format!("{}:{}", args.host, args.port);
    let server = MockRconServer::bind(&address, config).await?;

    tokio::signal::ctrl_c().await?;
    info!(
        "Shutting down after {} sessions, {} commands",
        server.sessions_opened(),
        server.received().await.len()
    );

    Ok(())
}
