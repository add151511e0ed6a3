#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `runrilla`: calibrate and flash RS-485 load-cell bars from the terminal.

mod cli;
mod error_fmt;
mod logging;
mod ops;
mod output;
mod sim;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use crate::cli::{Cli, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(&cli) {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn run(cli: &Cli) -> eyre::Result<()> {
    let params = ops::load_parameters(&cli.config)?;
    let level = if params.debug { "debug" } else { cli.log_level.as_str() };
    logging::init(cli.json, level, &params.logging)?;

    // Ctrl-C only raises the flag; the event loop stops the running operation.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .map_err(|e| eyre::eyre!("install Ctrl-C handler: {e}"))?;
    }

    let ctx = ops::Ctx {
        cli,
        params,
        shutdown,
    };
    ops::run(&ctx)
}
