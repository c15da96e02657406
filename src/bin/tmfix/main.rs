use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env, Target};
use log::error;
use std::fs::OpenOptions;
use std::path::Path;

use tmfix::{FixError, FixerConfig};

mod cli;
mod cmd_check;
mod cmd_fix;
mod cmd_list;
mod cmd_plan;

fn init_logger(level: &str, file: Option<&Path>) -> Result<()> {
    // RUST_LOG важнее --log-level
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.format_timestamp_millis();
    if let Some(p) = file {
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .with_context(|| format!("open log file {}", p.display()))?;
        builder.target(Target::Pipe(Box::new(f)));
    }
    builder.init();
    Ok(())
}

fn main() {
    let cli = cli::Cli::parse();

    let cfg = match FixerConfig::load(cli.config.as_deref()) {
        Ok(c) => c.with_log_file(cli.log_file.clone()),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = init_logger(&cli.log_level, cfg.log_file.as_deref()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli.cmd, cfg) {
        // лог может уходить в файл или быть выключен
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        // 2 = search finished, nothing good to restore
        let code = match e.downcast_ref::<FixError>() {
            Some(FixError::NotFound { .. }) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn run(cmd: cli::Cmd, cfg: FixerConfig) -> Result<()> {
    match cmd {
        cli::Cmd::Fix { sparsebundle, json } => cmd_fix::exec(&cfg, &sparsebundle, json),

        cli::Cmd::List { json } => cmd_list::exec(&cfg, json),

        cli::Cmd::Check { path } => cmd_check::exec(&cfg, &path),

        cli::Cmd::Plan { good_from, json } => cmd_plan::exec(&cfg, good_from.as_deref(), json),
    }
}
