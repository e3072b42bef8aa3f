mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::Loaded;
use mcasset_lib::publish::{B2Store, GitSink, PublishSink, StorageSink, UploadOptions};
use mcasset_lib::{BatchPolicy, BatchReport, ConsoleProgress, Pipeline, Settings};
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every selected version succeeded
async fn run(cli: Cli) -> Result<bool> {
    let file = match config::load_or_bootstrap(&cli.config)? {
        Loaded::Created(path) => {
            log::info!("Saved default config file to {:?}", path);
            log::info!("Please edit the config file and restart");
            return Ok(true);
        }
        Loaded::Config(file) => file,
    };

    let mut settings = Settings {
        output_dir: cli.output_dir.clone(),
        concurrency: cli.concurrency,
        max_asset_failures: cli.max_asset_failures,
        batch_policy: if cli.continue_on_error {
            BatchPolicy::ContinueOnError
        } else {
            BatchPolicy::FailFast
        },
        ..Settings::default()
    };
    settings.git = if cli.no_git { None } else { file.git() };
    settings.storage = file.storage();
    if settings.git.is_none() {
        log::info!("Git is disabled");
    }
    if settings.storage.is_none() {
        log::info!("B2 is disabled");
    }

    let http = settings
        .http_client()
        .context("Failed to build HTTP client")?;

    let mut sinks: Vec<Box<dyn PublishSink>> = Vec::new();
    if let Some(git) = settings.git.clone() {
        sinks.push(Box::new(GitSink::new(git)));
    }
    if let Some(storage) = &settings.storage {
        let store = B2Store::connect(http.clone(), storage)
            .await
            .context("Failed to authorize B2 account")?;
        sinks.push(Box::new(StorageSink::new(
            Arc::new(store),
            UploadOptions::from_settings(&settings),
        )));
    }

    let console = ConsoleProgress::start(std::io::stderr().is_terminal());
    let pipeline =
        Pipeline::with_client(settings, http, sinks).with_reporter(Arc::new(console.reporter()));
    let result = pipeline.run(&cli.selector()).await;
    drop(pipeline);
    console.finish().await;

    let report = result?;
    print_summary(&report);
    Ok(report.is_success())
}

fn print_summary(report: &BatchReport) {
    println!();
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(version) => println!(
                "{:<24} ok      {} assets ({} failed), mappings: {}, {} directories indexed",
                outcome.version_id,
                version.assets_ok,
                version.assets_failed,
                if version.mappings { "yes" } else { "no" },
                version.index.directories
            ),
            Err(e) => println!("{:<24} FAILED  {}", outcome.version_id, e),
        }
    }
    println!(
        "{} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
}
