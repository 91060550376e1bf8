use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::Ledger;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

mod config;
mod register;
mod session;

use config::Config;

type Input = Lines<BufReader<Stdin>>;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance tracker")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Without a subcommand an interactive menu is shown
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture and store a reference image for a person
    Register {
        /// Name to register; also the image file name
        #[arg(short, long)]
        name: String,
    },
    /// Run the attendance session until 'q' or Ctrl-C
    Start,
    /// Print the attendance ledger
    Show {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    match cli.command {
        Some(Commands::Register { name }) => register_face(&config, name.trim(), &mut input).await,
        Some(Commands::Start) => start(&config, &mut input).await,
        Some(Commands::Show { json }) => show(&config, json),
        None => menu(&config, &mut input).await,
    }
}

async fn menu(config: &Config, input: &mut Input) -> Result<()> {
    loop {
        println!();
        println!("1. Register New Face");
        println!("2. Start Attendance System");
        println!("3. Show Attendance");
        println!("4. Exit");
        prompt("Enter your choice: ")?;

        // Ctrl-C at the menu exits like choice 4.
        let Some(choice) = next_line_or(input, interrupted()).await? else {
            break;
        };
        let outcome = match choice.trim() {
            "1" => {
                prompt("Enter name: ")?;
                let Some(name) = next_line_or(input, interrupted()).await? else {
                    break;
                };
                register_face(config, name.trim(), input).await
            }
            "2" => start(config, input).await,
            "3" => show(config, false),
            "4" => break,
            _ => {
                println!("Invalid choice. Please try again.");
                Ok(())
            }
        };
        // Failures return to the menu.
        if let Err(e) = outcome {
            eprintln!("Error: {e:#}");
        }
    }
    println!("Exiting...");
    Ok(())
}

/// Next console line, or `None` if `interrupt` completes first.
async fn next_line_or<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => line,
        () = interrupt => Ok(None),
    }
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(())
}

/// Registration runs on a blocking thread; each Enter on stdin releases one
/// capture attempt, 'q', EOF or Ctrl-C cancels.
async fn register_face(config: &Config, name: &str, input: &mut Input) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<bool>(1);
    let attempts = config.register_attempts;

    let mut task = tokio::task::spawn_blocking({
        let config = config.clone();
        let name = name.to_string();
        move || {
            register::register(&config, &name, |attempt| {
                println!("[{attempt}/{attempts}] Look at the camera and press Enter to capture (q to cancel).");
                rx.blocking_recv().unwrap_or(false)
            })
        }
    });

    let mut tx = Some(tx);
    loop {
        tokio::select! {
            res = &mut task => {
                let path = res.context("registration task panicked")??;
                println!("Registered {name} ({}).", path.display());
                return Ok(());
            }
            line = input.next_line(), if tx.is_some() => {
                let go = matches!(line?, Some(l) if !l.trim().eq_ignore_ascii_case("q"));
                if !go {
                    tx = None;
                } else if let Some(sender) = &tx {
                    // The task may already be done; a closed channel is fine.
                    let _ = sender.send(true).await;
                }
            }
            _ = tokio::signal::ctrl_c(), if tx.is_some() => {
                tx = None;
            }
        }
    }
}

async fn start(config: &Config, input: &mut Input) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let mut task = tokio::task::spawn_blocking({
        let config = config.clone();
        let stop = stop.clone();
        move || session::run_attendance(&config, &stop)
    });
    println!("Attendance running. Type q and press Enter (or Ctrl-C) to stop.");

    let mut stdin_open = true;
    let state = loop {
        tokio::select! {
            res = &mut task => break res.context("attendance task panicked")??,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping session");
                stop.store(true, Ordering::Relaxed);
            }
            line = input.next_line(), if stdin_open => match line? {
                Some(l) if l.trim().eq_ignore_ascii_case("q") => stop.store(true, Ordering::Relaxed),
                Some(_) => {}
                None => stdin_open = false,
            },
        }
    };

    println!(
        "Session ended: {} frames, {} recognised, {} marked.",
        state.frames, state.matches, state.recorded
    );
    if state.mark_failures > 0 {
        println!("{} marks could not be written, see log.", state.mark_failures);
    }
    Ok(())
}

fn show(config: &Config, json: bool) -> Result<()> {
    let records = Ledger::load(&config.ledger_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No attendance recorded yet ({}).", config.ledger_path.display());
        return Ok(());
    }

    println!("{:<24} {:<10} {:<8} Status", "Name", "Date", "Time");
    for r in &records {
        println!(
            "{:<24} {:<10} {:<8} {}",
            r.identity,
            r.date.to_string(),
            r.time.to_string(),
            r.status.as_str()
        );
    }
    Ok(())
}
