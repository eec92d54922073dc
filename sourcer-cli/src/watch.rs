//! Live progress over the orchestrator's WebSocket

use anyhow::{Context, Result};
use colored::*;
use futures_util::StreamExt;
use serde_json::Value;
use sourcer_client::OrchestratorClient;
use sourcer_core::domain::event::{EventType, ProgressEvent};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Prints events as they arrive
///
/// Watching a single run stops at its `result` or `error` event; watching
/// every run goes on until the connection closes.
pub async fn watch(client: &OrchestratorClient, run_id: Option<Uuid>) -> Result<()> {
    let url = client.ws_url(run_id);
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;

    match run_id {
        Some(id) => println!("{}", format!("Watching run {}...", id).bold()),
        None => println!("{}", "Watching all runs...".bold()),
    }

    while let Some(message) = socket.next().await {
        let text = match message.context("WebSocket error")? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let event: ProgressEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                eprintln!("{} {}", "Unreadable message:".yellow(), e);
                continue;
            }
        };

        println!("{}", format_event(&event, run_id.is_none()));
        if run_id.is_some() && event.is_terminal() {
            if event.event_type == EventType::Result {
                print_payload(&event.payload);
            }
            break;
        }
    }

    Ok(())
}

/// One line per event
pub fn format_event(event: &ProgressEvent, show_run: bool) -> String {
    let time = event.timestamp.format("%H:%M:%S").to_string().dimmed();
    let run = if show_run {
        format!(" {}", short_id(event.run_id).dimmed())
    } else {
        String::new()
    };

    let body = match event.event_type {
        EventType::Status => {
            let message = event.payload["message"].as_str().unwrap_or("status").to_string();
            let progress = match (event.payload["index"].as_u64(), event.payload["total"].as_u64()) {
                (Some(index), Some(total)) => format!("[{}/{}] ", index, total),
                _ => String::new(),
            };
            let unsafe_terms = match event.payload["unsafe_terms"].as_u64() {
                Some(0) | None => String::new(),
                Some(n) => format!(" ({} unsafe term(s) flagged)", n).yellow().to_string(),
            };
            format!("{}{}{}", progress, message.cyan(), unsafe_terms)
        }
        EventType::Result => "Run completed".green().bold().to_string(),
        EventType::Error => {
            let message = event.payload.as_str().unwrap_or("Run failed");
            message.red().to_string()
        }
    };

    format!("{}{} {}", time, run, body)
}

pub fn print_payload(payload: &Value) {
    match serde_json::to_string_pretty(payload) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", payload),
    }
}

pub fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_line_shows_progress_and_flags() {
        let event = ProgressEvent::status(
            Uuid::new_v4(),
            json!({
                "stage": "keyword_verification",
                "index": 3,
                "total": 4,
                "message": "Stage 'keyword_verification' completed",
                "unsafe_terms": 2,
            }),
        );
        let line = format_event(&event, false);
        assert!(line.contains("[3/4]"));
        assert!(line.contains("keyword_verification"));
        assert!(line.contains("2 unsafe term(s)"));
    }

    #[test]
    fn test_error_line_and_run_prefix() {
        let run_id = Uuid::new_v4();
        let event = ProgressEvent::error(run_id, "Stage 'sourcing' failed: timeout");
        let line = format_event(&event, true);
        assert!(line.contains(&short_id(run_id)));
        assert!(line.contains("failed: timeout"));
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000001").unwrap();
        assert_eq!(short_id(id), "3f2a9c1e");
    }
}
