//! CLI argument parsing using clap.

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use zarrs_ozx::{storage::DEFAULT_TIMEOUT, viewer::DEFAULT_ELEMENT_ID};

#[derive(Parser)]
#[command(name = "zarrs_ozx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render the root group attributes of an archive as an HTML page
    View(ViewArgs),
    /// Check an archive against the zipped OME-Zarr (ozx) conventions
    Validate(ValidateArgs),
}

#[derive(clap::Args)]
pub struct ViewArgs {
    /// Page query carrying the archive locator, e.g. `url=https://example.com/image.ozx`
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Id of the page element receiving the attributes
    #[arg(long = "element", value_name = "ID", default_value = DEFAULT_ELEMENT_ID)]
    pub element_id: String,

    /// HTTP request timeout in seconds (0 waits indefinitely)
    #[arg(long = "timeout", value_name = "SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Write the page to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print only the attribute JSON
    #[arg(long)]
    pub text: bool,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    /// URL or path of the archive
    #[arg(value_name = "LOCATOR")]
    pub locator: String,

    /// Output the report in JSON format
    #[arg(short, long)]
    pub json: bool,

    /// HTTP request timeout in seconds (0 waits indefinitely)
    #[arg(long = "timeout", value_name = "SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout_secs: u64,
}

/// A request timeout from a number of seconds; zero disables the timeout.
pub fn timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
