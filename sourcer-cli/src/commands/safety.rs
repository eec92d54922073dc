//! Safety command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sourcer_client::OrchestratorClient;
use sourcer_core::domain::safety::{BannedTerm, SafetyDecision};
use std::collections::BTreeMap;

use crate::config::Config;

/// Safety subcommands
#[derive(Subcommand)]
pub enum SafetyCommands {
    /// Check one term against the banned-term index
    Check {
        term: String,

        /// Similarity above which the term is unsafe (defaults to the server's)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List banned terms grouped by category
    Terms,
    /// Add or update a banned term
    Add {
        term: String,

        /// Why the term is banned
        #[arg(short, long)]
        reason: String,

        /// Category, e.g. brand, prohibited, warning
        #[arg(short, long, default_value = "brand")]
        category: String,
    },
}

pub async fn handle_safety_command(command: SafetyCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(config.orchestrator_url.clone());

    match command {
        SafetyCommands::Check { term, threshold } => check_term(&client, &term, threshold).await,
        SafetyCommands::Terms => list_terms(&client).await,
        SafetyCommands::Add {
            term,
            reason,
            category,
        } => add_term(&client, BannedTerm::new(term, reason, category)).await,
    }
}

async fn check_term(client: &OrchestratorClient, term: &str, threshold: Option<f32>) -> Result<()> {
    if let Some(t) = threshold {
        if !(0.0..=1.0).contains(&t) {
            anyhow::bail!("threshold must be within [0, 1]");
        }
    }

    let decision = client
        .check_term(term, threshold)
        .await
        .context("Failed to check term")?;
    print_decision(&decision);

    Ok(())
}

async fn list_terms(client: &OrchestratorClient) -> Result<()> {
    let terms = client.list_banned_terms().await?;

    if terms.is_empty() {
        println!("{}", "No banned terms configured.".yellow());
        return Ok(());
    }

    let mut by_category: BTreeMap<&str, Vec<&BannedTerm>> = BTreeMap::new();
    for term in &terms {
        by_category.entry(term.category.as_str()).or_default().push(term);
    }

    println!("{}", format!("{} banned term(s):", terms.len()).bold());
    for (category, terms) in by_category {
        println!("\n  {}", category.cyan().bold());
        for term in terms {
            println!("    {} {}", term.term, format!("- {}", term.reason).dimmed());
        }
    }

    Ok(())
}

async fn add_term(client: &OrchestratorClient, term: BannedTerm) -> Result<()> {
    let saved = client
        .add_banned_term(&term)
        .await
        .context("Failed to add banned term")?;

    println!("{}", "✓ Banned term saved".green().bold());
    println!("  Term:     {}", saved.term.cyan());
    println!("  Category: {}", saved.category);
    println!("  Reason:   {}", saved.reason);
    println!(
        "{}",
        "  Runners pick the change up on their next index refresh.".dimmed()
    );

    Ok(())
}

fn print_decision(decision: &SafetyDecision) {
    let verdict = if decision.is_safe {
        "SAFE".green().bold()
    } else {
        "UNSAFE".red().bold()
    };
    println!("{} {}", verdict, decision.term);
    println!("  Similarity: {:.3}", decision.similarity_score);
    if let Some(matched) = &decision.matched_term {
        println!("  Matched:    {}", matched.yellow());
    }
    if let Some(reason) = &decision.reason {
        println!("  Reason:     {}", reason);
    }
}
