//! Quest automation engine CLI.
//!
//! `questline demo` runs the built-in demonstration quest against a simulated
//! world; `questline init-config` writes a default `questline.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use questline::demo::{DemoReport, run_demo};
use questline::exit_codes;
use questline::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config, write_config};
use questline::logging;

#[derive(Parser)]
#[command(
    name = "questline",
    version,
    about = "Tick-driven quest automation engine"
)]
struct Cli {
    /// Log engine decisions at debug level (overridden by QUESTLINE_LOG / RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the built-in demo quest against a simulated world.
    Demo {
        /// Stop after this many ticks if the quest is still running.
        #[arg(long, default_value_t = 500)]
        max_ticks: u64,
        /// Config file (defaults apply when missing).
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write a config file with default values.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Demo {
            max_ticks,
            config,
            json,
        } => cmd_demo(&config, max_ticks, json),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn cmd_demo(config_path: &Path, max_ticks: u64, json: bool) -> Result<i32> {
    if max_ticks == 0 {
        bail!("--max-ticks must be > 0");
    }
    let config = load_config(config_path)?;
    let report = run_demo(&config, max_ticks)?;
    if json {
        let payload = serde_json::to_string_pretty(&report).context("serialize report json")?;
        println!("{payload}");
    } else {
        print_report(&report);
    }
    Ok(if report.completed() {
        exit_codes::OK
    } else {
        exit_codes::INCOMPLETE
    })
}

fn print_report(report: &DemoReport) {
    let outcome = &report.outcome;
    println!("{}: {:?} after {} ticks", report.quest, outcome.stop, outcome.ticks);
    println!(
        "steps submitted: {}, step failures: {}, inputs: {}",
        outcome.steps_submitted, outcome.step_failures, report.inputs
    );
    println!("counter: {}", report.final_counter);
    if let Some(position) = report.final_position {
        println!("position: {position}");
    }
    if let Some(status) = &report.status {
        print!("{status}");
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &EngineConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_demo_defaults() {
        let cli = Cli::parse_from(["questline", "demo"]);
        match cli.command {
            Command::Demo {
                max_ticks,
                config,
                json,
            } => {
                assert_eq!(max_ticks, 500);
                assert_eq!(config, PathBuf::from("questline.toml"));
                assert!(!json);
            }
            Command::InitConfig { .. } => panic!("expected demo"),
        }
    }

    #[test]
    fn verbose_flag_is_global() {
        let cli = Cli::parse_from(["questline", "demo", "--verbose"]);
        assert!(cli.verbose);
        let cli = Cli::parse_from(["questline", "-v", "init-config"]);
        assert!(cli.verbose);
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["questline", "init-config", "--force", "--path", "x.toml"]);
        assert!(matches!(
            cli.command,
            Command::InitConfig { force: true, ref path } if path == Path::new("x.toml")
        ));
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("questline.toml");
        assert_eq!(cmd_init_config(&path, false).expect("first"), exit_codes::OK);
        assert!(cmd_init_config(&path, false).is_err());
        assert_eq!(cmd_init_config(&path, true).expect("force"), exit_codes::OK);
    }
}
