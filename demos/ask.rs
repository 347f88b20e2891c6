use std::io::Write;

use clap::Parser;
use portfolio_voice::answer::{AnswerSource, AnswerStreamEvent, RagClient};
use portfolio_voice::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Asks the answer backend a question and prints the streamed answer.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Question to ask.
    question: Option<String>,

    /// Only check backend health.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = RagClient::from_config(reqwest::Client::new(), &config);

    let health = client.health().await?;
    println!(
        "backend {}: status={} model_configured={:?}",
        client.base_url(),
        health.status().unwrap_or("unknown"),
        health.model_configured()
    );
    if args.health {
        return Ok(());
    }

    let question = args.question.unwrap_or_else(|| "What is your experience?".to_string());
    println!("> {}", question);

    let cancel = CancellationToken::new();
    let mut stream = client.ask(&question, &cancel);
    while let Some(event) = stream.next_event().await {
        match event {
            AnswerStreamEvent::Token(token) => {
                print!("{}", token);
                std::io::stdout().flush()?;
            }
            AnswerStreamEvent::Complete(text) => println!("\n\nfinal: {}", text),
            AnswerStreamEvent::Error(e) => anyhow::bail!("answer failed: {e}"),
        }
    }
    Ok(())
}
