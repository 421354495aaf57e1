use clap::Parser;
use engine::topics::FALLBACK_TOPIC;
use engine::{Config, Engine, Store};
use tokio::sync::mpsc;

/// Bulk-provision identities without the per-actor daily quota gate.
/// Produces the same archived identity records as the interactive bot.
#[derive(Debug, Parser)]
#[command(name = "batch")]
struct Cli {
    /// How many identities to provision
    #[arg(long)]
    count: u32,

    /// 6-letter referral code; falls back to FLOCK_REFERRAL_CODE
    #[arg(long)]
    referral: Option<String>,

    /// Comma-separated conversation topics
    #[arg(long)]
    topics: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let referral = match cli.referral.or_else(|| std::env::var("FLOCK_REFERRAL_CODE").ok()) {
        Some(code) => code,
        None => anyhow::bail!("no referral code: pass --referral or set FLOCK_REFERRAL_CODE"),
    };
    let topics: Vec<String> = cli
        .topics
        .as_deref()
        .unwrap_or(FALLBACK_TOPIC)
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect();

    let store = Store::connect(&config.database_url).await?;
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let engine = Engine::new(config, store, notify_tx);

    let printer = tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            println!("{}", notification.body);
        }
    });

    let summary = engine.run_batch(cli.count, &referral, topics).await?;
    drop(engine);
    let _ = printer.await;

    println!(
        "{} produced, {} registered, {} full conversations",
        summary.produced, summary.registered, summary.full_conversations
    );
    Ok(())
}
