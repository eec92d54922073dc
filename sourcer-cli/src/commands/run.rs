//! Run command handlers

use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use colored::*;
use sourcer_client::OrchestratorClient;
use sourcer_core::domain::run::{PipelineRun, RunStatus, StageResult};
use sourcer_core::dto::run::StoredRun;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;
use crate::watch::{self, format_event, print_payload, short_id};

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Queue a new run
    Submit {
        /// Product or market to research
        query: String,

        /// Follow progress until the run finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// List runs
    List {
        /// Only runs with this status (queued, running, completed, failed, cancelled)
        #[arg(short, long, value_parser = parse_status)]
        status: Option<RunStatus>,
    },
    /// Show a run with its stage results
    Get {
        /// Run ID or unambiguous prefix
        id: String,

        /// Also print raw stage output
        #[arg(long)]
        raw: bool,
    },
    /// Show the progress events a run has published
    Events {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Cancel a run
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Follow live progress of one run, or of every run
    Watch {
        /// Run ID or unambiguous prefix
        id: Option<String>,
    },
}

fn parse_status(s: &str) -> Result<RunStatus, String> {
    RunStatus::parse(&s.to_lowercase()).ok_or_else(|| format!("unknown status '{}'", s))
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(config.orchestrator_url.clone());

    match command {
        RunCommands::Submit { query, watch } => submit_run(&client, &query, watch).await,
        RunCommands::List { status } => list_runs(&client, status).await,
        RunCommands::Get { id, raw } => get_run(&client, &id, raw).await,
        RunCommands::Events { id } => list_events(&client, &id).await,
        RunCommands::Cancel { id } => cancel_run(&client, &id).await,
        RunCommands::Watch { id } => {
            let run_id = match id {
                Some(id) => Some(resolve_run_id(&client, &IdOrPrefix::parse(&id)).await?),
                None => None,
            };
            watch::watch(&client, run_id).await
        }
    }
}

async fn submit_run(client: &OrchestratorClient, query: &str, follow: bool) -> Result<()> {
    let response = client
        .submit_run(query)
        .await
        .context("Failed to submit run")?;

    println!("{}", "✓ Run queued".green().bold());
    println!("  ID:     {}", response.run_id.to_string().cyan());
    println!("  Status: {}", colorize_status(response.status));

    if follow {
        println!();
        watch::watch(client, Some(response.run_id)).await?;
    }

    Ok(())
}

async fn list_runs(client: &OrchestratorClient, status: Option<RunStatus>) -> Result<()> {
    let runs = client.list_runs(status).await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} run(s):", runs.len()).bold());
    println!();
    for run in &runs {
        print_run_summary(run);
    }

    Ok(())
}

async fn get_run(client: &OrchestratorClient, id: &str, raw: bool) -> Result<()> {
    let run_id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client.get_run(run_id).await?;

    print_run_details(&run, raw);

    Ok(())
}

async fn list_events(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let events = client.list_run_events(run_id).await?;

    if events.is_empty() {
        println!("{}", "No events published for this run yet.".yellow());
        return Ok(());
    }

    println!("{}", format!("Events for run {}:", run_id).bold());
    println!("{}", "─".repeat(80).dimmed());
    for event in &events {
        println!("{}", format_event(event, false));
    }
    println!("{}", "─".repeat(80).dimmed());

    Ok(())
}

async fn cancel_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let response = client.cancel_run(run_id).await.map_err(|e| {
        if e.is_client_error() {
            anyhow!("Cannot cancel run {}: {}", run_id, e)
        } else {
            anyhow::Error::from(e)
        }
    })?;

    match response.outcome.as_str() {
        "cancelled" => println!("{}", format!("✓ Run {} cancelled", run_id).green()),
        _ => println!(
            "{}",
            format!("✓ Cancellation requested; run {} stops after its current stage", run_id)
                .yellow()
        ),
    }

    Ok(())
}

fn print_run_summary(run: &StoredRun) {
    println!(
        "  {} Run {} {}",
        "▸".cyan(),
        short_id(run.run_id).dimmed(),
        colorize_status(run.status)
    );
    println!("    Query: {}", run.query);
    println!(
        "    Time:  {}",
        run.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
    );
    println!();
}

fn print_run_details(run: &PipelineRun, raw: bool) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Query:     {}", run.query);
    println!("  Status:    {}", colorize_status(run.status));
    println!("  Created:   {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = run.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = run.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
        if let Some(started) = run.started_at {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("  Duration:  {}s", seconds);
        }
    }

    if run.attempts > 1 {
        println!("  Attempts:  {}", run.attempts.to_string().yellow());
    }

    if !run.stage_results.is_empty() {
        println!("\n{}", "Stages:".bold());
        for result in &run.stage_results {
            print_stage_result(result, raw);
        }
    }

    if let Some(result) = &run.final_result {
        println!("\n{}", "Result:".bold());
        print_payload(result);
    }

    if let Some(error) = &run.error_message {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

fn print_stage_result(result: &StageResult, raw: bool) {
    let marker = if result.is_ok() { "✓".green() } else { "✗".red() };
    let seconds = result
        .completed_at
        .signed_duration_since(result.started_at)
        .num_milliseconds() as f64
        / 1000.0;
    println!("  {} {} ({:.1}s)", marker, result.stage_name.bold(), seconds);

    if let Some(error) = &result.error {
        println!("    {}", error.red());
    }
    if let Some(parse_error) = &result.parse_error {
        println!("    {} {}", "Unparsed output:".yellow(), parse_error);
    }
    for decision in &result.safety {
        if decision.is_safe {
            println!(
                "    {} {} ({:.2})",
                "safe".green(),
                decision.term,
                decision.similarity_score
            );
        } else {
            println!(
                "    {} {} ~ {} ({:.2}) {}",
                "unsafe".red(),
                decision.term,
                decision.matched_term.as_deref().unwrap_or("?"),
                decision.similarity_score,
                decision.reason.as_deref().unwrap_or("").dimmed()
            );
        }
    }
    if raw {
        println!("{}", result.raw_output.dimmed());
    }
}

/// Colorize run status for display
fn colorize_status(status: RunStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        RunStatus::Queued => label.yellow(),
        RunStatus::Running => label.cyan(),
        RunStatus::Completed => label.green(),
        RunStatus::Failed => label.red(),
        RunStatus::Cancelled => label.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Running").unwrap(), RunStatus::Running);
        assert!(parse_status("paused").is_err());
    }
}
