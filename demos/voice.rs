use std::sync::{Arc, Mutex};

use clap::Parser;
use portfolio_voice::capture::CpalMicrophone;
use portfolio_voice::playback::CpalOutput;
use portfolio_voice::types::ConversationState;
use portfolio_voice::{
    AssistantContext, Config, ConversationController, ConversationUi, TapPrompt, TapTrigger,
    VoiceServices,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

/// Terminal voice assistant.
///
/// Press Enter to start talking and Enter again to stop. Any other line is
/// sent as a typed question; `tap` answers a tap prompt and `quit` exits.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Input device name (see the `devices` demo).
    #[arg(long)]
    input: Option<String>,

    /// Output device name.
    #[arg(long)]
    output: Option<String>,
}

#[derive(Default)]
struct TerminalUi {
    tap: Mutex<Option<TapTrigger>>,
}

impl TerminalUi {
    fn tap(&self) -> bool {
        match self.tap.lock().ok().and_then(|mut tap| tap.take()) {
            Some(trigger) => {
                trigger.tap();
                true
            }
            None => false,
        }
    }
}

impl ConversationUi for TerminalUi {
    fn set_state(&self, state: ConversationState) {
        println!("[{}]", state);
    }

    fn set_status(&self, status: &str) {
        println!("  {}", status);
    }

    fn show_text(&self, text: &str) {
        println!("assistant: {}", text);
    }

    fn show_tap_prompt(&self) -> TapPrompt {
        let (trigger, prompt) = TapPrompt::channel();
        if let Ok(mut tap) = self.tap.lock() {
            *tap = Some(trigger);
        }
        println!("  type 'tap' to hear the answer");
        prompt
    }

    fn dismiss_tap_prompt(&self) {
        if let Ok(mut tap) = self.tap.lock() {
            tap.take();
        }
    }

    fn show_transcript(&self, text: &str) {
        println!("you: {}", text);
    }

    fn show_spoken(&self, text: &str) {
        println!("assistant (speaking): {}", text);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();
    let ui = Arc::new(TerminalUi::default());

    let services = if config.is_demo() {
        tracing::warn!("no provider keys configured, running in demo mode");
        None
    } else {
        Some(VoiceServices::from_config(reqwest::Client::new(), &config)?)
    };
    let mut builder = AssistantContext::builder(config, ui.clone())
        .with_microphone(Arc::new(CpalMicrophone::new(args.input)))
        .with_output(Arc::new(CpalOutput::new(args.output)));
    if let Some(services) = services {
        builder = builder.with_services(services);
    }
    let controller = ConversationController::spawn(builder.build());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" if controller.state() == ConversationState::Listening => controller.release(),
            "" => controller.press(),
            "tap" => {
                if !ui.tap() {
                    println!("  nothing to tap");
                }
            }
            "quit" | "exit" => break,
            question => controller.ask(question),
        }
    }

    controller.shutdown().await;
    Ok(())
}
