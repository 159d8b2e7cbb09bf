//! zarrs_ozx CLI - view and validate zipped Zarr hierarchies.

mod cli;

use std::io::Write;

use anyhow::{Context, Result, bail};
use clap::Parser;
use zarrs_ozx::{
    HtmlPage, MetadataViewer, SourceLocator, ViewerOptions,
    storage::{HttpStoreOptions, open_archive},
    validate::validate,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = cli::Cli::parse();
    match &cli.command {
        cli::Commands::View(args) => view(args),
        cli::Commands::Validate(args) => validate_archive(args),
    }
}

fn view(args: &cli::ViewArgs) -> Result<()> {
    let mut options = ViewerOptions::default();
    options
        .element_id(args.element_id.as_str())
        .timeout(cli::timeout(args.timeout_secs));
    let viewer = MetadataViewer::new(options);

    let mut page = HtmlPage::viewer(&args.element_id);
    let text = viewer.render(&args.query, &mut page)?;
    let out = if args.text {
        format!("{text}\n")
    } else {
        page.to_html()
    };

    match &args.output {
        Some(path) => std::fs::write(path, out)
            .with_context(|| format!("could not write {}", path.display()))?,
        None => std::io::stdout().lock().write_all(out.as_bytes())?,
    }
    Ok(())
}

fn validate_archive(args: &cli::ValidateArgs) -> Result<()> {
    let locator = SourceLocator::parse(&args.locator)?;
    let mut options = HttpStoreOptions::default();
    options.timeout(cli::timeout(args.timeout_secs));
    let archive = open_archive(&locator, &options)
        .with_context(|| format!("could not open {locator}"))?;

    let report = validate(&locator, &*archive);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    if !report.is_valid() {
        bail!("{locator} does not meet the zipped OME-Zarr requirements");
    }
    Ok(())
}
