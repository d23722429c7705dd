use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use spotifyimport::ImportConfig;
use spotifyimport::access_token::SP_DC_INSTRUCTIONS;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct RootArgs {
    /// Logging level
    #[arg(long, value_enum, default_value_t = LoggingLevel::Info)]
    pub logging: LoggingLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add the tracks of a scrobble export to Spotify liked songs
    Import {
        /// JSON array of scrobbled tracks, `-` or nothing reads standard input
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory receiving the failure report
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,

        /// Write the failure report without indentation
        #[arg(long, default_value = "false")]
        minify: bool,

        #[command(flatten)]
        config: ImportConfig,

        #[command(flatten)]
        spotify: SpotifyArgs,
    },
    /// Print a web player access token for the given session cookies
    #[command(after_help = format!("To obtain SP_DC and SP_KEY:\n{SP_DC_INSTRUCTIONS}"))]
    AccessToken {
        /// Value of the `sp_dc` cookie
        #[arg(env = "SPOTIFY_SP_DC")]
        sp_dc: String,
        /// Value of the `sp_key` cookie
        #[arg(env = "SPOTIFY_SP_KEY")]
        sp_key: String,
    },
}

/// Credentials, in order of precedence: token, web player cookies, OAuth app.
#[derive(Args, Clone, Debug)]
#[group()]
pub struct SpotifyArgs {
    /// Bearer token with the user-library-read and user-library-modify scopes
    #[arg(long, env = "SPOTIFY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Value of the `sp_dc` web player cookie
    #[arg(long, env = "SPOTIFY_SP_DC", hide_env_values = true, requires = "sp_key")]
    pub sp_dc: Option<String>,
    /// Value of the `sp_key` web player cookie
    #[arg(long, env = "SPOTIFY_SP_KEY", hide_env_values = true, requires = "sp_dc")]
    pub sp_key: Option<String>,
    /// The client ID for the Spotify API application
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    pub client_id: Option<String>,
    /// The client secret for the Spotify API application
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
    /// Clear the cached OAuth token
    #[arg(long, default_value = "false")]
    pub clear_cache: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoggingLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LoggingLevel> for Level {
    fn from(level: LoggingLevel) -> Self {
        match level {
            LoggingLevel::Error => Level::ERROR,
            LoggingLevel::Warn => Level::WARN,
            LoggingLevel::Info => Level::INFO,
            LoggingLevel::Debug => Level::DEBUG,
            LoggingLevel::Trace => Level::TRACE,
        }
    }
}
