mod document;
mod script;

use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use chronicler_history::{History, HistoryConfig};
use clap::Parser;

use crate::script::Session;

/// Replays an edit script against a property document with undo/redo history.
#[derive(Parser, Debug)]
#[command(name = "chronicler", version, about)]
struct Cli {
    /// Script to run. Reads commands from stdin when omitted.
    script: Option<PathBuf>,

    /// Coalescing window for `drag` commands, in milliseconds.
    #[arg(long = "coalesce-ms")]
    coalesce_ms: Option<u64>,

    /// JSON file with history settings.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    tracing::info!("Starting chronicler");

    let mut config = cli
        .config
        .as_deref()
        .map(HistoryConfig::load_or_default)
        .unwrap_or_default();
    if let Some(ms) = cli.coalesce_ms {
        config.coalesce_delay_ms = ms;
    }

    let history = History::new(config);
    let renders = Rc::new(Cell::new(0u64));
    {
        let (renders, observed) = (Rc::clone(&renders), history.clone());
        history.subscribe(move || {
            renders.set(renders.get() + 1);
            tracing::debug!("History changed, cursor at {}", observed.cursor());
        });
    }

    let input: Box<dyn BufRead> = match &cli.script {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open script: {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let mut session = Session::new(history, io::stdout().lock());
    session.run(input)?;

    tracing::info!(
        "Finished with {} values after {} history changes",
        session.document().snapshot().len(),
        renders.get()
    );
    Ok(())
}
