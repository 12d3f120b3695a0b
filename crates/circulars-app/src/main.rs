//! Circulars binary - composition root.
//!
//! 1. Parse the command line
//! 2. Load configuration from TOML and apply flag overrides
//! 3. Initialise tracing
//! 4. Build the HTTP conversation store
//! 5. Drive the circular view (or the catalog) for the chosen command

mod cli;

use std::sync::Arc;

use clap::Parser;

use circulars_chat::{all_tags, CircularFilter, CircularView, DocumentState, Readiness};
use circulars_core::{Circular, CircularQuery, CircularsConfig, Message};
use circulars_store::{ConversationStore, HttpConversationStore};

use cli::{CliArgs, Command};

fn print_circular(circular: &Circular) {
    let mark = if circular.bookmark { "*" } else { " " };
    println!(
        "{} {}  {}  {}",
        mark, circular.circular_id, circular.date, circular.title
    );
}

fn print_history(messages: &[Message]) {
    if messages.is_empty() {
        println!("(no messages yet)");
        return;
    }
    for message in messages {
        println!("[{}] Q: {}", message.timestamp.to_rfc3339(), message.question);
        println!("    A: {}", message.answer);
        if !message.sources.is_empty() {
            println!("    sources: {}", message.sources.join(", "));
        }
    }
}

fn print_view(view: &CircularView) {
    let Some(circular) = view.circular() else {
        return;
    };
    println!("{}", circular.title);
    println!("  id:       {}", circular.circular_id);
    println!("  date:     {}", circular.date);
    println!("  document: {}", circular.url);
    if !circular.tags.is_empty() {
        println!("  tags:     {}", circular.tags.join(", "));
    }
    println!("  bookmark: {}", circular.bookmark);

    let references = view.references();
    if !references.is_empty() {
        println!("References:");
        for reference in &references {
            println!("  {}  {}", reference.circular_id, reference.title);
        }
    }

    match view.readiness() {
        Readiness::Ready => println!("Chat: ready"),
        Readiness::Failed => println!("Chat: unavailable"),
        Readiness::Idle | Readiness::Loading => println!("Chat: not started"),
    }
}

/// Activate `id`, reporting a missing or unloadable document.
async fn open(view: &CircularView, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = view.activate(id).await {
        if view.document_state() == DocumentState::NotFound {
            return Err(format!("circular {} not found", id).into());
        }
        return Err(e.into());
    }
    Ok(())
}

async fn run(
    command: Command,
    store: Arc<dyn ConversationStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Show { id } => {
            let view = CircularView::new(store);
            open(&view, &id).await?;
            print_view(&view);
            print_history(&view.messages());
        }
        Command::Ask { id, questions } => {
            let view = CircularView::new(store);
            open(&view, &id).await?;
            if view.readiness() != Readiness::Ready {
                return Err(format!("chat is unavailable for {}", id).into());
            }

            let results =
                futures::future::join_all(questions.iter().map(|q| view.submit(q))).await;
            for (question, result) in questions.iter().zip(&results) {
                if let Err(e) = result {
                    tracing::warn!(question = %question, kind = %e.kind(), error = %e, "Question failed");
                    eprintln!("failed: {}: {}", question, e);
                }
            }
            print_history(&view.messages());
        }
        Command::Bookmark { id } => {
            let view = CircularView::new(store);
            open(&view, &id).await?;
            let bookmark = view.toggle_bookmark().await?;
            println!("{} bookmark: {}", id, bookmark);
        }
        Command::List {
            bookmarked,
            year,
            month,
            search,
            tags,
        } => {
            let query = match (bookmarked, year, month) {
                (true, _, _) => CircularQuery::Bookmarked,
                (false, Some(year), Some(month)) => CircularQuery::Published { year, month },
                _ => CircularQuery::All,
            };
            let circulars = store.list_circulars(query).await?;
            let filter = CircularFilter::new()
                .with_term(search.unwrap_or_default())
                .with_tags(tags);

            let shown = filter.apply(&circulars);
            for circular in &shown {
                print_circular(circular);
            }
            println!("{} of {} circulars", shown.len(), circulars.len());
            let available = all_tags(&circulars);
            if !available.is_empty() {
                println!("tags: {}", available.join(", "));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing exists; its outcome is logged below.
    let config_file = args.resolve_config_path();
    let loaded = CircularsConfig::load(&config_file);
    let mut config = match loaded {
        Ok(ref config) => config.clone(),
        Err(_) => CircularsConfig::default(),
    };
    if let Some(ref base_url) = args.base_url {
        config.backend.base_url = base_url.clone();
    }
    if let Some(ref level) = args.log_level {
        config.general.log_level = level.clone();
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match loaded {
        Ok(_) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Err(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    let store = HttpConversationStore::new(config.backend.clone())?;
    tracing::debug!(
        base_url = %config.backend.trimmed_base_url(),
        db_name = %config.backend.db_name,
        "Backend client ready"
    );

    run(args.command, Arc::new(store)).await
}
