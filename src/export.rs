use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;

use crate::ledger::OutcomeRecord;

/// `spotifyimport-failures-<run start, UTC>.json`
pub fn report_file_name(started_at: DateTime<Utc>) -> String {
    format!(
        "spotifyimport-failures-{}.json",
        started_at.format("%Y%m%dT%H%M%SZ")
    )
}

/// Write the failed records as a JSON array into `dir`. The file is written
/// even when nothing failed, so every finished run leaves a report behind.
pub fn export_report(
    failures: &[OutcomeRecord],
    dir: &Path,
    started_at: DateTime<Utc>,
    minify: bool,
) -> Result<PathBuf> {
    let output = dir.join(report_file_name(started_at));
    let file = std::fs::File::create(&output)
        .wrap_err_with(|| format!("could not create failure report {:?}", output))?;
    let mut writer = std::io::BufWriter::new(file);

    if !minify {
        serde_json::to_writer_pretty(&mut writer, failures)?;
    } else {
        serde_json::to_writer(&mut writer, failures)?;
    }
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!("wrote {} failed tracks to: {:?}", failures.len(), output);

    Ok(output)
}
