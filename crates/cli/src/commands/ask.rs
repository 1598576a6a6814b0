//! `switchyard ask` — Single-query or interactive mode.

use switchyard_agent::{GenerationCoordinator, GenerationOutcome, GenerationRequest};
use switchyard_config::AppConfig;
use switchyard_core::message::{Conversation, Message};
use switchyard_core::model::QueryType;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::runtime;

/// Per-request overrides from the command line.
#[derive(Debug, Default)]
pub struct AskOptions {
    pub difficulty: Option<u8>,
    pub query_type: Option<QueryType>,
    pub model: Option<String>,
    pub json: bool,
}

impl AskOptions {
    fn request(&self, query: &str, conversation: &Conversation) -> GenerationRequest {
        GenerationRequest {
            query: query.to_string(),
            conversation: conversation.clone(),
            difficulty: self.difficulty,
            query_type: self.query_type,
            model: self.model.clone(),
        }
    }
}

pub async fn run(query: Option<String>, options: AskOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let coordinator = runtime::build_coordinator(&config)?;

    let result = match query {
        Some(query) => single(&coordinator, &query, &options).await,
        None => interactive(&coordinator, &options).await,
    };

    coordinator.shutdown().await;
    result
}

async fn single(
    coordinator: &GenerationCoordinator,
    query: &str,
    options: &AskOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    eprint!("  Thinking...");
    let outcome = coordinator
        .generate(&options.request(query, &Conversation::new()))
        .await;
    eprint!("\r              \r");

    let outcome = outcome?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.text.trim());
        eprintln!("{}", footer(&outcome));
    }
    Ok(())
}

async fn interactive(
    coordinator: &GenerationCoordinator,
    options: &AskOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let models = coordinator.lifecycle().registry().len();
    println!();
    println!("  Switchyard — Interactive Mode");
    println!("  Models:  {models} registered");
    println!(
        "  Memory:  {}",
        if coordinator.retrieval().is_some() { "on" } else { "off" }
    );
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation = Conversation::new();

    loop {
        stdout.write_all(b"  You > ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match coordinator.generate(&options.request(line, &conversation)).await {
            Ok(outcome) => {
                println!();
                for text_line in outcome.text.trim().lines() {
                    println!("  Assistant > {text_line}");
                }
                println!("  {}", footer(&outcome));
                println!();
                conversation.push(Message::user(line));
                conversation.push(Message::assistant(outcome.text));
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

fn footer(outcome: &GenerationOutcome) -> String {
    format!(
        "[{} · difficulty {} · {} · {}/{} tokens · {} ms · {} memories]",
        outcome.model_id,
        outcome.difficulty,
        outcome.query_type,
        outcome.tokens_used,
        outcome.max_tokens,
        outcome.elapsed_ms,
        outcome.context_results,
    )
}
