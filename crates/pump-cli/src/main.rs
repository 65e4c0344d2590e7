//! 🚀 pump-cli -- the front door, the bouncer, the maitre d' of the pump.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, then gets out of the way and lets the
//! coordinator do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use pump::app_config::{AppConfig, load_config};
use pump::pumps::PumpSet;
use pump::sinks::SinkRegistry;
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "pump.toml";

/// 🚰 Drain analytics records from the shared store into every configured pump.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// 📂 TOML config. Defaults to ./pump.toml when it exists, env vars (PUMP_*) otherwise.
    config: Option<PathBuf>,

    /// 🔍 Validate the config, resolve every pump type, print a summary, exit. Contacts nothing.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    // 📡 Set up tracing -- because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Err(err) = run(args).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like a service isn't reachable. \
                Double-check that Redis and every sink endpoint are actually running. \
                Even servers need a nudge sometimes. ☕"
            );
        }
        // 🗑️ Exit with prejudice. Process exitus maximus.
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config_file = resolve_config_path(args.config)?;
    let app_config = load_config(config_file.as_deref())
        .context("💀 Couldn't load the config. Make sure you didn't forget something obvious.")?;

    if args.check {
        return check(&app_config);
    }
    pump::run(app_config).await
}

/// 🔎 An explicit path must exist. The default path only counts if it's there.
fn resolve_config_path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) => {
            let exists = path.try_exists().context(format!(
                "💀 Couldn't even check whether '{}' exists. Permissions, maybe?",
                path.display()
            ))?;
            if !exists {
                anyhow::bail!(
                    "💀 Configuration file '{}' does not exist. If it's a relative path, \
                     check your cwd, or use an absolute path to be absolutely certain.",
                    path.display()
                );
            }
            Ok(Some(path))
        }
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            Ok(default.try_exists().unwrap_or(false).then_some(default))
        }
    }
}

/// 📋 `--check`: everything startup would verify, minus the network.
fn check(app_config: &AppConfig) -> Result<()> {
    app_config.validate()?;
    let plan = PumpSet::plan(app_config, &SinkRegistry::with_builtin_sinks())?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "pump", "type", "timeout", "retries", "filtered", "omit detail",
    ]);
    for pump in &plan {
        table.add_row(vec![
            pump.name.clone(),
            pump.type_name.clone(),
            format!("{}s", pump.timeout.as_secs()),
            pump.max_retries.to_string(),
            yes_no(pump.filtered).to_string(),
            yes_no(pump.omit_details).to_string(),
        ]);
    }

    let required_lease = app_config.required_lease()?;
    println!("{table}");
    println!(
        "✅ {} pumps, purge every {}s, lock '{}' leased for {}s (needs at least {}s)",
        plan.len(),
        app_config.server.purge_interval_secs,
        app_config.server.lock_name,
        app_config.server.lock_lease_secs,
        required_lease.as_secs()
    );
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
