mod args;
mod build_api;

use std::io::Read;
use std::path::{Path, PathBuf};

use args::{Command, RootArgs};
use build_api::BuildApi;
use chrono::Utc;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use spotifyimport::access_token;
use spotifyimport::export::export_report;
use spotifyimport::import::import;
use spotifyimport::source::decode;
use tracing::{Level, debug, info};
use tracing_subscriber::{filter::Targets, prelude::*};

fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) if path != Path::new("-") => {
            std::fs::read(path).wrap_err_with(|| format!("could not read {:?}", path))
        }
        _ => {
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .wrap_err("could not read standard input")?;
            Ok(buffer)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = RootArgs::parse();

    // Only shows logging for current crate, not sure if there is a cleaner way
    let level: Level = args.logging.into();
    let filter = Targets::new().with_target("spotifyimport", Level::TRACE);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish()
        .with(filter)
        .init();
    debug!("Logging level: {}", level);

    match args.command {
        Command::Import {
            input,
            report_dir,
            minify,
            config,
            spotify,
        } => {
            let started_at = Utc::now();
            if !report_dir.is_dir() {
                return Err(eyre!("report directory {:?} does not exist", report_dir));
            }

            let bytes = read_input(input.as_deref())?;
            let tracks = decode(&bytes).wrap_err("invalid scrobble input")?;
            info!("decoded {} tracks", tracks.len());

            let config_dir = dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("spotifyimport");
            let api = spotify.parse(&config, &config_dir).await?;

            let outcome = import(tracks, api, &config).await?;
            debug!("batches: {:?}", outcome.stats);
            export_report(&outcome.report.failures, &report_dir, started_at, minify)?;

            if let Some(reason) = outcome.aborted {
                return Err(eyre!("run aborted: {}", reason));
            }
        }
        Command::AccessToken { sp_dc, sp_key } => {
            let client = reqwest::Client::new();
            let token = access_token::fetch(&client, &sp_dc, &sp_key).await?;
            if let Some(expiry) = token.expires_at() {
                info!("token valid until {}", expiry);
            }
            println!("{}", token.access_token);
        }
    }

    Ok(())
}
