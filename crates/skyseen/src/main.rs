//! `skyseen` - CLI for reconstructing what Bluesky users have seen
//!
//! This binary prepares archived firehose dumps, replays them through the
//! session simulator, and queries the resulting seen store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::warn;

use skyseen::cli::{
    Cli, Command, ConfigCommand, DeletedCommand, OutputFormat, PrepareCommand, ReorderCommand,
    RunsCommand, SeenCommand, SessionsCommand, SimulateCommand,
};
use skyseen::config::date_to_ms;
use skyseen::prepare::{prepare, PrepareOptions};
use skyseen::stream::{BatchDirSource, RecordSource};
use skyseen::{deleted, evaluate, init_logging, reorder, Config, Simulator, Storage};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    if let Command::Config(config_cmd) = cli.command {
        return handle_config(cli.config, config_cmd);
    }

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Prepare(cmd) => handle_prepare(&config, &cmd),
        Command::Reorder(cmd) => handle_reorder(&config, &cmd),
        Command::Deleted(cmd) => handle_deleted(&config, &cmd),
        Command::Simulate(cmd) => handle_simulate(&config, &cmd),
        Command::Sessions(cmd) => handle_sessions(&config, &cmd),
        Command::Seen(cmd) => handle_seen(&config, &cmd),
        Command::Runs(cmd) => handle_runs(&config, &cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Prune(cmd) => handle_prune(&config, cmd.keep),
        Command::Config(_) => Ok(()),
    }
}

fn open_store(config: &Config) -> Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("failed to open seen store {}", path.display()))
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_prepare(config: &Config, cmd: &PrepareCommand) -> Result<()> {
    let mut options = PrepareOptions::new(&cmd.input, &cmd.output, &config.stream);
    if cmd.end_date.is_some() {
        options.end_date = cmd.end_date;
    }
    if let Some(batch_size) = cmd.batch_size {
        options.batch_size = batch_size.max(1);
    }

    let store = open_store(config)?;
    let report = prepare(&options, Some(&store))
        .with_context(|| format!("failed to prepare {}", cmd.input.display()))?;

    if cmd.json {
        return print_json(&report);
    }
    println!("Prepared {}", cmd.output.display());
    println!("---------------");
    println!("Raw files:       {}", report.reorder.files_read);
    println!("Records:         {} in, {} out", report.reorder.records_in, report.reorder.records_out);
    println!("Duplicates:      {}", report.reorder.duplicates);
    println!("Dropped (no ts): {}", report.reorder.dropped_no_time);
    println!("Malformed:       {}", report.reorder.malformed);
    println!("Batches:         {}", report.reorder.batches_written);
    println!("Users:           {} ({} deleted)", report.users, report.deleted_users);
    println!(
        "Posts:           {} ({} deleted, {:.2}%)",
        report.posts, report.deleted_posts, report.deletion_rate
    );
    println!("Tombstones:      {}", report.tombstones_written);
    Ok(())
}

fn handle_reorder(config: &Config, cmd: &ReorderCommand) -> Result<()> {
    let report = reorder::reorder_dir(
        &cmd.input,
        &cmd.output,
        cmd.end_date.or(config.stream.end_date),
        cmd.batch_size.unwrap_or(config.stream.batch_size).max(1),
        config.stream.dedup,
    )
    .with_context(|| format!("failed to reorder {}", cmd.input.display()))?;

    if cmd.json {
        return print_json(&report);
    }
    println!(
        "Wrote {} records to {} batches in {} ({} duplicates, {} without a time, {} malformed)",
        report.records_out,
        report.batches_written,
        cmd.output.display(),
        report.duplicates,
        report.dropped_no_time,
        report.malformed
    );
    Ok(())
}

fn handle_deleted(config: &Config, cmd: &DeletedCommand) -> Result<()> {
    let end_ms = cmd.end_date.map(date_to_ms).or_else(|| config.end_ms());
    let report = deleted::scan_dir(&cmd.input, end_ms)
        .with_context(|| format!("failed to scan {}", cmd.input.display()))?;

    if cmd.json {
        return print_json(&report.to_json());
    }
    println!("Users:         {}", report.users);
    println!("Deleted users: {}", report.deleted_users.len());
    println!("Posts:         {}", report.posts);
    println!("Deleted posts: {}", report.deleted_posts.len());
    println!("Deletion rate: {:.2}%", report.deletion_rate());
    if report.user_overlap + report.post_overlap > 0 {
        println!(
            "Overlaps:      {} users, {} posts (referenced before they appeared)",
            report.user_overlap, report.post_overlap
        );
    }
    Ok(())
}

fn handle_simulate(config: &Config, cmd: &SimulateCommand) -> Result<()> {
    let end_ms = cmd.end_date.map(date_to_ms).or_else(|| config.end_ms());
    let store = if cmd.no_store {
        None
    } else {
        Some(open_store(config)?)
    };
    let run_id = store
        .as_ref()
        .map(|store| store.begin_run(&cmd.input.display().to_string()))
        .transpose()?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let mut simulator = Simulator::new(config.session.clone());
    let mut source = BatchDirSource::new(&cmd.input, end_ms);
    let handle = source.handle();

    let sent = runtime
        .block_on(async {
            let interrupt = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing with the records read so far");
                    interrupt.stop();
                }
            });
            simulator
                .replay(&mut source, config.stream.channel_capacity)
                .await
        })
        .with_context(|| format!("failed to replay {}", cmd.input.display()))?;

    let sessions = simulator.sessions();
    let summary = evaluate(
        sessions,
        config.evaluation.min_interactions,
        simulator.post_count(),
        simulator.deleted_post_count(),
    );

    if let (Some(store), Some(run_id)) = (&store, run_id) {
        for session in sessions {
            store
                .save_session(run_id, session)
                .with_context(|| format!("failed to store session {}", session.id))?;
        }
        store.finish_run(run_id, &summary)?;
        if config.storage.max_runs > 0 {
            store.prune_runs_keep_recent(config.storage.max_runs)?;
        }
    }

    if cmd.json {
        return print_json(&serde_json::json!({
            "run": run_id,
            "records": sent,
            "interrupted": handle.should_stop(),
            "users": simulator.user_count(),
            "stats": simulator.stats(),
            "summary": summary,
        }));
    }
    if handle.should_stop() {
        println!("Replay interrupted after {sent} records.");
    }
    if let Some(run_id) = run_id {
        println!("Run {run_id}: {sent} records from {}", cmd.input.display());
    }
    println!("{summary}");
    Ok(())
}

fn handle_sessions(config: &Config, cmd: &SessionsCommand) -> Result<()> {
    let store = open_store(config)?;
    let sessions = store.sessions_for(&cmd.did, cmd.run, cmd.limit)?;

    match cmd.format {
        OutputFormat::Json => print_json(&sessions)?,
        OutputFormat::Table => {
            println!(
                "{:<6} {:<19} {:<19} {:>8} {:>11}",
                "NUMBER", "START", "END", "ACTIONS", "IMPRESSIONS"
            );
            for s in &sessions {
                println!(
                    "{:<6} {:<19} {:<19} {:>8} {:>11}",
                    s.number,
                    format_ms(s.start_ms),
                    format_ms(s.end_ms),
                    s.action_count,
                    s.impressions
                );
            }
        }
        OutputFormat::Plain => {
            for s in &sessions {
                println!(
                    "{} {} {} actions, {} impressions",
                    s.id,
                    format_ms(s.start_ms),
                    s.action_count,
                    s.impressions
                );
            }
        }
    }
    if sessions.is_empty() && cmd.format != OutputFormat::Json {
        println!("No sessions for {}", cmd.did);
    }
    Ok(())
}

fn handle_seen(config: &Config, cmd: &SeenCommand) -> Result<()> {
    let store = open_store(config)?;
    let seen = store.seen_by(&cmd.did, cmd.run, cmd.limit)?;

    match cmd.format {
        OutputFormat::Json => print_json(&seen)?,
        OutputFormat::Table => {
            println!("{:<24} {:>5} {:<9} URI", "SESSION", "POS", "VIEW");
            for post in &seen {
                println!(
                    "{:<24} {:>5} {:<9} {}",
                    post.session_id, post.position, post.view, post.uri
                );
            }
        }
        OutputFormat::Plain => {
            for post in &seen {
                println!("{}", post.uri);
            }
        }
    }
    Ok(())
}

fn handle_runs(config: &Config, cmd: &RunsCommand) -> Result<()> {
    let store = open_store(config)?;
    let runs = store.runs(cmd.limit)?;

    if cmd.json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No runs stored.");
        return Ok(());
    }
    println!(
        "{:>4} {:<19} {:>9} {:>11} {:>9} {:>9}  INPUT",
        "ID", "STARTED", "SESSIONS", "INTERACTIVE", "PRECISION", "RECALL"
    );
    for run in &runs {
        let score = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        println!(
            "{:>4} {:<19} {:>9} {:>11} {:>9} {:>9}  {}{}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.sessions,
            run.interactive,
            score(run.mean_precision),
            score(run.mean_recall),
            run.input,
            if run.finished_at.is_none() { " (unfinished)" } else { "" }
        );
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.stats()?;

    if json {
        return print_json(&serde_json::json!({
            "database_path": store.path(),
            "stats": stats,
        }));
    }
    println!("skyseen status");
    println!("--------------");
    println!("Database:    {}", store.path().display());
    println!("Size:        {} bytes", stats.db_size_bytes);
    println!("Runs:        {}", stats.runs);
    if let Some(latest) = stats.latest_run {
        println!("Latest run:  {latest}");
    }
    println!("Sessions:    {}", stats.sessions);
    println!("Impressions: {}", stats.impressions);
    println!("Tombstones:  {}", stats.tombstones);
    Ok(())
}

fn handle_prune(config: &Config, keep: usize) -> Result<()> {
    let store = open_store(config)?;
    let deleted = store.prune_runs_keep_recent(keep)?;
    println!("Deleted {deleted} runs, kept the {keep} most recent.");
    Ok(())
}

fn handle_config(config_path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path).context("failed to load configuration")?;
            if json {
                return print_json(&config);
            }
            println!("Current Configuration");
            println!("=====================");
            println!();
            println!("[Storage]");
            println!("  Database path:       {}", config.database_path().display());
            println!("  Max runs:            {}", config.storage.max_runs);
            println!();
            println!("[Stream]");
            println!("  Batch size:          {}", config.stream.batch_size);
            println!(
                "  End date:            {}",
                config
                    .stream
                    .end_date
                    .map_or_else(|| "none".to_string(), |d| d.to_string())
            );
            println!("  Dedup:               {}", config.stream.dedup);
            println!("  Channel capacity:    {}", config.stream.channel_capacity);
            println!();
            println!("[Session]");
            println!(
                "  Idle threshold (s):  {}",
                config.session.idle_threshold_secs
            );
            println!("  Refresh size:        {}", config.session.refresh_size);
            println!(
                "  Max posts per user:  {}",
                config.session.max_posts_per_user
            );
            println!(
                "  Max posts/session:   {}",
                config.session.max_posts_per_session()
            );
            println!();
            println!("[Evaluation]");
            println!(
                "  Min interactions:    {}",
                config.evaluation.min_interactions
            );
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
