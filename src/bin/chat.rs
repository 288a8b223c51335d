//! Terminal front end for a chat session.
//!
//! Asks for the passkey, then reads one message per line. Ctrl-C while a
//! reply is being generated stops it.
//!
//! Commands: `/clear`, `/transcript <path>`, `/quit`.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use moderated_chat::config::ChatConfig;
use moderated_chat::events::{BotMessageKind, SessionEvent};
use moderated_chat::session::{ConversationSession, TurnOutcome};
use moderated_chat::transcript::Transcript;

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::BotMessage { kind, raw, .. } => match kind {
            BotMessageKind::Notice | BotMessageKind::Error => println!("! {}", raw),
            _ => println!("\nbot> {}\n", raw),
        },
        SessionEvent::AccessDenied { message } | SessionEvent::ContextFailed { message } => {
            println!("! {}", message)
        }
        SessionEvent::ContextLoading => println!("(loading context...)"),
        SessionEvent::ContextLoaded { suggestions } => {
            println!("Suggested questions:");
            for s in suggestions {
                println!("  - {}", s);
            }
        }
        SessionEvent::Cancelled { message } => println!("\n{}", message),
        SessionEvent::Cleared => println!("(conversation cleared)"),
        SessionEvent::AccessGranted
        | SessionEvent::UserMessage { .. }
        | SessionEvent::ModeChanged { .. }
        | SessionEvent::GenerationStarted
        | SessionEvent::GenerationFinished => {}
    }
}

async fn prompt(label: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = ChatConfig::load().context("invalid configuration")?;
    let conversation =
        ConversationSession::from_config(&config).context("failed to build chat session")?;
    let transcript = Arc::new(Transcript::new());
    conversation.subscribe(transcript.clone());
    conversation.subscribe(Arc::new(print_event));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt("passkey> ").await?;
        let Some(secret) = lines.next_line().await? else {
            return Ok(());
        };
        match conversation.unlock(&secret).await {
            Ok(_) => break,
            Err(e) if conversation.snapshot().access_granted => {
                // Context failed; sends will say so.
                log::warn!("context load failed: {}", e);
                break;
            }
            Err(_) => continue,
        }
    }

    loop {
        prompt("you> ").await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        if line == "/quit" {
            break;
        }
        if line == "/clear" {
            if !conversation.clear() {
                println!("! still generating");
            }
            continue;
        }
        if let Some(path) = line.strip_prefix("/transcript") {
            let path = path.trim();
            let path = if path.is_empty() {
                transcript.file_name()
            } else {
                path.to_string()
            };
            match transcript.write_to(&path) {
                Ok(()) => println!("(transcript written to {})", path),
                Err(e) => println!("! could not write {}: {}", path, e),
            }
            continue;
        }

        let Ok(turn) = conversation.begin(line) else {
            continue;
        };
        let run = turn.run();
        tokio::pin!(run);
        let outcome = tokio::select! {
            outcome = &mut run => outcome,
            _ = tokio::signal::ctrl_c() => {
                conversation.cancel();
                run.await
            }
        };
        if let TurnOutcome::Failed(e) = outcome {
            log::error!("turn failed: {}", e);
        }
    }

    Ok(())
}
