use crate::logging::{LogFormat, LogLevel};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "media-cache-gc")]
#[command(about = "Keep the media cache within its size budget")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(
        short,
        long,
        env = "MEDIA_CACHE_CONFIG",
        help = "Path to a TOML cache configuration"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Run a single pass, print its outcome as JSON and exit")]
    pub once: bool,

    #[arg(
        short = 'l',
        long,
        help = "Set logging level",
        default_value = "info",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, help = "Log output format", default_value = "compact", value_enum)]
    pub format: LogFormat,
}
