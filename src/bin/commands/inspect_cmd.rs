use anyhow::{Context, Result};
use mmdb_compact::{load_source, MmdbReader, RecordFilter};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cli_utils::{format_bytes, format_number, format_unix_timestamp};

pub fn cmd_inspect(database: PathBuf, json_output: bool, countries: bool) -> Result<()> {
    let source = load_source(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let reader = MmdbReader::from_source(source)
        .with_context(|| format!("Failed to parse database: {}", database.display()))?;
    let meta = reader.metadata();
    let header = reader.header();

    let per_country = if countries {
        Some(count_countries(&reader)?)
    } else {
        None
    };

    if json_output {
        let mut output = json!({
            "file": database.display().to_string(),
            "size": reader.as_bytes().len(),
            "database_type": meta.database_type,
            "ip_version": meta.ip_version.number(),
            "node_count": meta.node_count,
            "record_size": meta.record_size.bits(),
            "binary_format_version": format!(
                "{}.{}",
                meta.binary_format_major_version, meta.binary_format_minor_version
            ),
            "build_epoch": meta.build_epoch,
            "languages": meta.languages,
            "description": meta.description,
            "data_section_size": header.data_section_len(),
        });
        if let Some(per_country) = &per_country {
            output["countries"] = json!(per_country);
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {}", database.display());
    println!("Size:     {}", format_bytes(reader.as_bytes().len()));
    println!();
    println!("Metadata:");
    println!("  Database type:   {}", meta.database_type);
    if !meta.description.is_empty() {
        println!("  Description:");
        for (lang, desc) in &meta.description {
            println!("    {}: {}", lang, desc);
        }
    }
    println!(
        "  Build time:      {} ({})",
        format_unix_timestamp(meta.build_epoch),
        meta.build_epoch
    );
    println!("  IP version:      IPv{}", meta.ip_version.number());
    println!("  Node count:      {}", format_number(meta.node_count as u64));
    println!("  Record size:     {} bits", meta.record_size.bits());
    println!(
        "  Format version:  {}.{}",
        meta.binary_format_major_version, meta.binary_format_minor_version
    );
    println!("  Data section:    {}", format_bytes(header.data_section_len()));

    if let Some(per_country) = per_country {
        println!();
        println!("Networks per country:");
        for (country, count) in &per_country {
            println!("  {}: {}", country, format_number(*count));
        }
    }

    Ok(())
}

/// Networks per country code; records without one count under "-"
fn count_countries<S: AsRef<[u8]>>(reader: &MmdbReader<S>) -> Result<BTreeMap<String, u64>> {
    let filter = RecordFilter::new(Vec::<String>::new());
    let mut counts = BTreeMap::new();
    for entry in reader.networks()? {
        let entry = entry.context("Failed to walk database")?;
        let code = filter.country_code(&entry.record).unwrap_or("-");
        *counts.entry(code.to_string()).or_insert(0u64) += 1;
    }
    Ok(counts)
}
