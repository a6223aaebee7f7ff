use std::io::Write;
use std::sync::Arc;

use futures::StreamExt;
use parley_core::types::TranscriptLine;
use parley_core::{ChatInput, InnerTaskInput, LlmProvider, ProviderFactory, ProviderSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

const MODE: &str = "reception";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,parley_core=info,parley_chat_cli=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let streaming = std::env::args().any(|a| a == "--stream");

    // Env + optional TOML overlay
    let settings = ProviderSettings::load();
    info!(target = "parley_chat_cli", settings = ?settings, "Loaded provider settings");

    let provider = ProviderFactory::new(settings).build()?;
    let health = provider.health().await;
    info!(
        target = "parley_chat_cli",
        provider = provider.name(),
        healthy = health.is_ok(),
        streaming = streaming && provider.supports_streaming(),
        "Provider ready. Commands: /summary, /consent <text>, /memory <text>, /quit"
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(target = "parley_chat_cli", error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        res = repl(Arc::clone(&provider), streaming) => {
            if let Err(e) = res {
                error!(target = "parley_chat_cli", error = %e, "Input loop failed");
            }
        }
        _ = shutdown => {
            info!(target = "parley_chat_cli", "Shutting down...");
        }
    }

    provider.close().await.ok();
    Ok(())
}

async fn repl(provider: Arc<dyn LlmProvider>, streaming: bool) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut transcript: Vec<TranscriptLine> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }
        if text == "/summary" {
            let input = InnerTaskInput::SessionSummary {
                transcript: transcript.clone(),
            };
            run_inner_task(provider.as_ref(), input).await;
            continue;
        }
        if let Some(rest) = text.strip_prefix("/consent ") {
            let input = InnerTaskInput::ConsentDecision { text: rest.to_string() };
            run_inner_task(provider.as_ref(), input).await;
            continue;
        }
        if let Some(rest) = text.strip_prefix("/memory ") {
            let input = InnerTaskInput::MemoryExtract { text: rest.to_string() };
            run_inner_task(provider.as_ref(), input).await;
            continue;
        }

        transcript.push(TranscriptLine {
            role: "user".into(),
            text: text.to_string(),
        });
        let reply = if streaming && provider.supports_streaming() {
            stream_reply(provider.as_ref(), text).await
        } else {
            chat_reply(provider.as_ref(), text).await
        };
        if let Some(reply) = reply {
            transcript.push(TranscriptLine {
                role: "assistant".into(),
                text: reply,
            });
        }
    }
    Ok(())
}

async fn chat_reply(provider: &dyn LlmProvider, text: &str) -> Option<String> {
    match provider.chat_call(ChatInput::new(MODE, text)).await {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(target = "parley_chat_cli", error = %e, "Cannot render result"),
            }
            Some(result.assistant_text)
        }
        Err(e) => {
            error!(target = "parley_chat_cli", error = %e, "chat_call failed");
            None
        }
    }
}

async fn stream_reply(provider: &dyn LlmProvider, text: &str) -> Option<String> {
    let mut stream = match provider.chat_stream(ChatInput::new(MODE, text), None).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(target = "parley_chat_cli", error = %e, "chat_stream failed");
            return None;
        }
    };
    let mut full = String::new();
    while let Some(delta) = stream.next().await {
        match delta {
            Ok(delta) => {
                print!("{delta}");
                std::io::stdout().flush().ok();
                full.push_str(&delta);
            }
            Err(e) => {
                println!();
                error!(target = "parley_chat_cli", error = %e, "Stream ended with an error");
                return (!full.is_empty()).then_some(full);
            }
        }
    }
    println!();
    Some(full)
}

async fn run_inner_task(provider: &dyn LlmProvider, input: InnerTaskInput) {
    let task = input.task_name();
    match provider.inner_task_call(input).await {
        Ok(result) => println!("[{}] {}", result.task, result.json_text),
        Err(e) => error!(target = "parley_chat_cli", task, error = %e, "inner_task_call failed"),
    }
}
