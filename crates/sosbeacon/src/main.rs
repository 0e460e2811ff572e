//! `sosctl` - CLI for sosbeacon
//!
//! Runs SOS activations against the configured devices and manages the local
//! history of sent alerts.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Local;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use sosbeacon::cli::{Cli, Command, ConfigCommand, HistoryCommand};
use sosbeacon::{
    init_logging, retained_clips, ClipAudioCapture, Config, LocalEvidenceStore,
    OrchestratorSettings, Outcome, SosEvent, SosOrchestrator, StaticLocationProvider, Storage,
    TimelineEntry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Activate(cmd) => handle_activate(&config, cmd.json).await,
        Command::History(cmd) => handle_history(&config, cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

async fn handle_activate(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = LocalEvidenceStore::from_config(config)
        .context("failed to open the local evidence store")?;
    let orchestrator = Arc::new(SosOrchestrator::new(
        Arc::new(StaticLocationProvider::from_config(&config.device)),
        Arc::new(ClipAudioCapture::from_config(config)),
        Arc::new(store),
        OrchestratorSettings::from_config(config),
    ));

    let mut entries = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match entries.recv().await {
                Ok(entry) => print_entry(&entry, json),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Timeline output fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut activation = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.activate().await })
    };

    let result = loop {
        tokio::select! {
            joined = &mut activation => break joined.context("activation task failed")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                if !orchestrator.cancel().await? {
                    eprintln!("Nothing to cancel, the alert is already being sent.");
                }
            }
        }
    };

    let snapshot = orchestrator.snapshot();
    // Closing the channel lets the printer drain and exit.
    drop(orchestrator);
    printer.await.context("timeline printer failed")?;

    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
    }

    match result {
        Ok(Outcome::Sent(event)) => {
            if !json {
                println!();
                print_event(&event);
            }
            Ok(())
        }
        Ok(Outcome::Cancelled) => {
            if !json {
                println!("No alert was sent.");
            }
            Ok(())
        }
        Ok(Outcome::Ignored) => bail!("an activation is already in progress"),
        Err(error) => {
            if let Some(alert) = &snapshot.alert {
                eprintln!("{}: {}", alert.title, alert.message);
            }
            Err(error.into())
        }
    }
}

fn print_entry(entry: &TimelineEntry, json: bool) {
    if json {
        match serde_json::to_string(entry) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to encode timeline entry"),
        }
    } else {
        println!("[{}] {:<10} {}", entry.timestamp, entry.kind.to_string(), entry.message);
    }
}

fn print_event(event: &SosEvent) {
    println!("SOS event #{}", event.id);
    println!("  User:      {}", event.user_id);
    println!("  Location:  {}", event.location());
    println!("  Audio:     {}", event.audio_url);
    println!(
        "  Sent at:   {}",
        event.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
}

fn handle_history(config: &Config, cmd: HistoryCommand) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;

    match cmd {
        HistoryCommand::List { limit, user, json } => {
            let events = match user.as_deref() {
                Some(user_id) => storage.list_for_user(user_id, limit)?,
                None => storage.list_recent(limit)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No SOS events recorded.");
            } else {
                for event in &events {
                    println!(
                        "{:>5}  {}  {:<16} {}  {}",
                        event.id,
                        event.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                        event.user_id,
                        event.location(),
                        event.audio_url
                    );
                }
            }
        }
        HistoryCommand::Show { id, json } => {
            let Some(event) = storage.get(id)? else {
                bail!("SOS event {id} not found");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&event)?);
            } else {
                print_event(&event);
            }
        }
        HistoryCommand::Delete { id } => {
            if storage.delete(id)? {
                println!("Deleted SOS event {id}.");
            } else {
                bail!("SOS event {id} not found");
            }
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;
    let stats = storage.stats()?;
    let recordings_dir = config.recordings_dir();
    let kept_clips = retained_clips(&recordings_dir)?;

    if json {
        let status = serde_json::json!({
            "user_id": config.sos.user_id,
            "database_path": config.database_path(),
            "media_dir": config.media_dir(),
            "total_events": stats.total_events,
            "oldest_event": stats.oldest_event,
            "newest_event": stats.newest_event,
            "db_size_bytes": stats.db_size_bytes,
            "recordings_dir": recordings_dir,
            "retained_clips": kept_clips,
            "location_permission": config.device.location_permission,
            "microphone_permission": config.device.microphone_permission,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let when = |ts: Option<chrono::DateTime<chrono::Utc>>| {
            ts.map_or_else(
                || "-".to_string(),
                |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            )
        };
        println!("sosctl status");
        println!("-------------");
        println!("User:          {}", config.sos.user_id);
        println!("Database:      {}", config.database_path().display());
        println!("Media:         {}", config.media_dir().display());
        println!("SOS events:    {}", stats.total_events);
        println!("Oldest:        {}", when(stats.oldest_event));
        println!("Newest:        {}", when(stats.newest_event));
        println!("Database size: {} bytes", stats.db_size_bytes);
        println!(
            "Kept clips:    {} in {} (uploads that failed)",
            kept_clips.len(),
            recordings_dir.display()
        );
        println!(
            "Permissions:   location {}, microphone {}",
            granted(config.device.location_permission),
            granted(config.device.microphone_permission)
        );
    }
    Ok(())
}

fn granted(allowed: bool) -> &'static str {
    if allowed {
        "granted"
    } else {
        "denied"
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[SOS]");
                println!("  User ID:            {}", config.sos.user_id);
                println!("  Recording (s):      {}", config.sos.recording_duration_secs);
                println!("  Location timeout:   {}s", config.sos.location_timeout_secs);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Media directory:    {}", config.media_dir().display());
                println!("  Public base URL:    {}", config.public_base_url());
                println!();
                println!("[Device]");
                println!(
                    "  Position:           {:.6}, {:.6} (±{} m)",
                    config.device.latitude, config.device.longitude, config.device.accuracy_m
                );
                println!("  Location:           {}", granted(config.device.location_permission));
                println!(
                    "  Microphone:         {}",
                    granted(config.device.microphone_permission)
                );
                println!("  Recordings:         {}", config.recordings_dir().display());
                match &config.device.clip_path {
                    Some(clip) => println!("  Source clip:        {}", clip.display()),
                    None => println!("  Source clip:        (generated silence)"),
                }
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
