pub mod board;
pub mod cache;
pub mod cli;
pub mod column;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod filter;
pub mod format;
pub mod handle;
pub mod render;
pub mod sort;
pub mod store;
pub mod sync;
pub mod task;
pub mod transition;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info, warn};

use crate::board::Board;
use crate::cli::{Command, ShowArgs};
use crate::filter::ViewSettings;

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args)?;
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(verbose = cli.verbose, quiet = cli.quiet, "starting kanban CLI");
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.kanbanrc.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;
    let debounce = cfg.debounce()?;
    let view = ViewSettings::with_recency(cfg.recency_window()?);
    let renderer = render::Renderer::new(&cfg)?;

    let command = cli.command.unwrap_or(Command::Show(ShowArgs {
        column: None,
        tags: vec![],
        all: false,
    }));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let mut board = Board::load(&data_dir, debounce, view)
            .await
            .with_context(|| format!("failed to open board at {}", data_dir.display()))?;

        let result = commands::dispatch(&mut board, &renderer, command, Utc::now()).await;

        if let Err(err) = board.flush().await {
            warn!(error = %err, "linked file not updated");
            eprintln!("warning: {err}; changes are kept in the local cache");
        }
        result
    })?;

    info!("done");
    Ok(())
}
