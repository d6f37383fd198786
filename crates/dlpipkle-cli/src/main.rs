use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use dlpipkle_core::{Config, DownloadRequest, Effects, ExecutionOutcome, SystemEffects};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod cli;
mod output;
mod style;

use cli::{DlpipkleCli, Mode};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = DlpipkleCli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let mode = cli.mode();
    let request = cli.request();
    let outcome = match load_config(&cli) {
        Ok(config) => {
            let effects = SystemEffects::new(&config).map_err(|err| eyre!("{err:?}"))?;
            execute(&effects, mode, &request).map_err(|err| eyre!("{err:?}"))?
        }
        Err(err) => ExecutionOutcome::user_error(
            format!("{err:#}"),
            json!({ "hint": "check --index-url and DLPIPKLE_INDEX_URL" }),
        ),
    };
    let code = output::emit_output(&cli, mode, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(quiet: bool, verbose: u8) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!(
        "warn,dlpipkle={level},dlpipkle_cli={level},dlpipkle_core={level},\
         dlpipkle_python={level},dlpipkle_resolver={level}"
    );
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_config(cli: &DlpipkleCli) -> anyhow::Result<Config> {
    let config = Config::from_env()?;
    match cli.index_url.as_deref() {
        Some(url) => config.with_index_url(url),
        None => Ok(config),
    }
}

fn execute(
    effects: &dyn Effects,
    mode: Mode,
    request: &DownloadRequest,
) -> anyhow::Result<ExecutionOutcome> {
    match mode {
        Mode::Download => dlpipkle_core::download(effects, request),
        Mode::ListPlatforms => dlpipkle_core::list_platforms(effects, request),
        Mode::DependencyTree => dlpipkle_core::dependency_tree(effects, request),
    }
}
