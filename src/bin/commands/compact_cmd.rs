use anyhow::{Context, Result};
use mmdb_compact::{compact, load_source, CompactConfig, CompactError, SourceBytes};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::cli_utils::{format_bytes, format_number};

pub struct CompactArgs {
    pub source: Option<PathBuf>,
    pub url: Option<String>,
    pub output: PathBuf,
    pub countries: Vec<String>,
    pub config: Option<PathBuf>,
    pub ipv4_only: bool,
    pub database_type: Option<String>,
    pub build_epoch: Option<u64>,
    pub threads: Option<usize>,
}

pub fn cmd_compact(args: CompactArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => CompactConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => CompactConfig::default(),
    };
    if !args.countries.is_empty() {
        config.targets = args.countries.iter().cloned().collect();
    }
    if args.ipv4_only {
        config.include_ipv6 = false;
    }
    if let Some(database_type) = args.database_type {
        config.database_type = database_type;
    }
    if args.build_epoch.is_some() {
        config.build_epoch = args.build_epoch;
    }
    if let Some(url) = args.url {
        config.source_url = url;
    }
    match args.threads {
        Some(0) | None => {}
        Some(1) => config.parallel = false,
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .context("Failed to configure worker threads")?,
    }
    let config = config.validate().context("Invalid configuration")?;

    let source = match &args.source {
        Some(path) => load_source(path)
            .with_context(|| format!("Failed to load source: {}", path.display()))?,
        None => download(&config.source_url)
            .with_context(|| format!("Failed to download source: {}", config.source_url))?,
    };

    let start = Instant::now();
    let report = compact(source.as_ref(), &config, &args.output)
        .with_context(|| format!("Failed to compact into {}", args.output.display()))?;

    println!();
    println!("Networks per country:");
    for (country, count) in &report.counts {
        println!("  {}: {}", country, format_number(*count));
    }
    println!();
    println!(
        "Source networks: {}, kept: {}, written after merging: {}",
        format_number(report.total_networks),
        format_number(report.kept_networks),
        format_number(report.written_networks)
    );
    println!(
        "Output: {} ({}, {} nodes, {}-bit records) in {:.2?}",
        args.output.display(),
        format_bytes(report.output_size),
        format_number(report.node_count as u64),
        report.record_size.bits(),
        start.elapsed()
    );

    Ok(())
}

fn download(url: &str) -> mmdb_compact::Result<SourceBytes> {
    log::info!("Downloading {}", url);
    let unavailable = |e: reqwest::Error| CompactError::SourceUnavailable(format!("{}: {}", url, e));

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(unavailable)?;
    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(unavailable)?;
    let bytes = response.bytes().map_err(unavailable)?;

    log::info!("Downloaded {}", format_bytes(bytes.len()));
    SourceBytes::from_vec(bytes.to_vec())
}
