use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use gamecafe_core::{
    Config, Database, Event, QuotaReconciler, QuotaStore, ReconcilerConfig, SessionContext,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{format_secs, remote_store, saved_session, CliResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Log in, start the countdown and read commands from stdin
    ///
    /// Commands: pause, resume, toggle, buy <minutes>, status, logout, quit
    Run {
        /// Tick period in milliseconds; 1000 is real time
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
        /// Print every event as a JSON line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Pause,
    Resume,
    Toggle,
    Buy(u32),
    Status,
    Logout,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let command = match verb.as_str() {
        "pause" | "p" => Command::Pause,
        "resume" | "r" => Command::Resume,
        "toggle" | "t" => Command::Toggle,
        "status" | "s" => Command::Status,
        "logout" => Command::Logout,
        "quit" | "q" | "exit" => Command::Quit,
        "buy" | "b" => {
            let minutes = words
                .next()
                .ok_or_else(|| "usage: buy <minutes>".to_string())?
                .parse::<u32>()
                .map_err(|_| "minutes must be a non-negative integer".to_string())?;
            Command::Buy(minutes)
        }
        other => return Err(format!("unknown command: {other}")),
    };
    if words.next().is_some() {
        return Err(format!("unexpected arguments after '{verb}'"));
    }
    Ok(command)
}

/// How the loop ended.
enum Exit {
    /// Credentials dropped, final usage written.
    Logout,
    /// Leave the session resumable at next login.
    Unload,
}

enum Flow {
    Continue,
    Exit(Exit),
}

struct Console {
    json: bool,
}

impl Console {
    fn event(&self, event: &Event) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "could not encode event"),
            }
            return;
        }
        match event {
            Event::TimerStarted { remaining_secs, .. } => {
                println!("session started: {} remaining", format_secs(*remaining_secs))
            }
            Event::TimerPaused { remaining_secs, .. } => {
                println!("paused at {}", format_secs(*remaining_secs))
            }
            Event::TimerResumed { remaining_secs, .. } => {
                println!("resumed at {}", format_secs(*remaining_secs))
            }
            Event::TimeAdded {
                added_secs,
                remaining_secs,
                ..
            } => println!(
                "+{} min, {} remaining",
                added_secs / 60,
                format_secs(*remaining_secs)
            ),
            Event::TimerExpired { .. } => println!("time expired"),
            Event::CheckpointIssued {
                used_minutes,
                reason,
                ..
            } => debug!(used_minutes, %reason, "checkpoint"),
            Event::SessionTerminated { remaining_secs, .. } => {
                println!("logged out with {} remaining", format_secs(*remaining_secs))
            }
            Event::StateSnapshot {
                user_id,
                phase,
                display,
                ..
            } => println!("{user_id}: {phase} {display}"),
        }
    }

    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

pub async fn run(action: SessionAction, config: &Config) -> CliResult {
    match action {
        SessionAction::Run { interval_ms, json } => run_session(config, interval_ms, json).await,
    }
}

async fn run_session(config: &Config, interval_ms: u64, json: bool) -> CliResult {
    let db = Database::open()?;
    let session = saved_session(&db)?;
    let store: Arc<dyn QuotaStore> = Arc::new(remote_store(config)?);
    let mut reconciler = QuotaReconciler::new(
        Arc::clone(&store),
        session,
        ReconcilerConfig::from(&config.timer),
    );
    let console = Console { json };

    console.event(&reconciler.login().await?);
    reconciler.session().save(&db)?;

    let mut ticker = session_ticker(interval_ms);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let exit = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(event) = reconciler.tick() {
                    console.event(&event);
                } else if !json && reconciler.is_running() && reconciler.remaining_secs() % 60 == 0 {
                    println!("{} remaining", format_secs(reconciler.remaining_secs()));
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(command) => {
                        let was_running = reconciler.is_running();
                        let flow = apply(command, &mut reconciler, store.as_ref(), &console).await;
                        // Ticks owed for the wait only count if the clock was running.
                        if !was_running {
                            ticker.reset();
                        }
                        match flow {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Exit(exit)) => break exit,
                            Err(e) => console.error(&e.to_string()),
                        }
                    }
                    Err(message) => console.error(&message),
                },
                Ok(None) => break Exit::Unload,
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    break Exit::Unload;
                }
            },
            _ = tokio::signal::ctrl_c() => break Exit::Unload,
        }
    };

    match exit {
        Exit::Logout => {
            SessionContext::clear(&db)?;
        }
        Exit::Unload => {
            if let Some(event) = reconciler.unload() {
                console.event(&event);
            }
            let flushed = reconciler.settle().await;
            info!(flushed, "session unloaded");
            reconciler.session().save(&db)?;
        }
    }
    Ok(())
}

/// Ticks missed while a command is awaited fire in a burst once it returns,
/// so a slow purchase still charges the seconds played meanwhile.
fn session_ticker(interval_ms: u64) -> Interval {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    ticker
}

async fn apply(
    command: Command,
    reconciler: &mut QuotaReconciler,
    store: &dyn QuotaStore,
    console: &Console,
) -> CliResult<Flow> {
    match command {
        Command::Pause => match reconciler.pause() {
            Some(event) => console.event(&event),
            None => console.event(&reconciler.snapshot()),
        },
        Command::Resume => match reconciler.resume()? {
            Some(event) => console.event(&event),
            None => console.event(&reconciler.snapshot()),
        },
        Command::Toggle => console.event(&reconciler.toggle()?),
        Command::Buy(minutes) => {
            store.add_minutes(reconciler.session(), minutes).await?;
            console.event(&reconciler.purchase_completed(minutes).await?);
        }
        Command::Status => console.event(&reconciler.snapshot()),
        Command::Logout => {
            console.event(&reconciler.logout().await?);
            return Ok(Flow::Exit(Exit::Logout));
        }
        Command::Quit => return Ok(Flow::Exit(Exit::Unload)),
    }
    Ok(Flow::Continue)
}
