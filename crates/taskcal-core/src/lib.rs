pub mod api;
pub mod auth;
pub mod calendar;
pub mod classify;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod form;
pub mod render;
pub mod session;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskcal CLI"
  );
  debug!(
    taskcalrc = ?cli.taskcalrc,
    data = ?cli.data,
    rc_overrides = cli.rc_overrides.len(),
    "parsed global options"
  );

  let mut cfg = config::Config::load(
    cli.taskcalrc.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let renderer =
    render::Renderer::new(&cfg)?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;

  runtime.block_on(
    commands::dispatch(
      cli.command,
      &cfg,
      &data_dir,
      &renderer
    )
  )?;

  info!("done");
  Ok(())
}
