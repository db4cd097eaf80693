use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Synthetic viewer load generator for HTTP streaming origins",
    long_about = "Simulates large numbers of concurrent viewers consuming live or on-demand\n\
                  HTTP-delivered video streams (segmented playlists and plain progressive\n\
                  files), for load-testing a streaming origin or CDN.\n\
                  \n\
                  Sessions fetch and re-poll playlists, pace segment downloads at playback\n\
                  cadence, and report into a process-wide statistics registry exposed over\n\
                  a read-only HTTP endpoint."
)]
pub struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(
        short,
        long,
        default_value = "herd.toml",
        help = "Path to the TOML configuration file"
    )]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
