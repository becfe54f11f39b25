use anyhow::{Context, Result};
use mmdb_compact::{load_source, MmdbReader, Network};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cli_utils::data_value_to_json;

pub fn cmd_query(database: PathBuf, ip: String, quiet: bool) -> Result<()> {
    let addr: IpAddr = ip
        .trim()
        .parse()
        .with_context(|| format!("Not an IP address: {}", ip))?;

    let source = load_source(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let reader = MmdbReader::from_source(source)
        .with_context(|| format!("Failed to parse database: {}", database.display()))?;

    let result = reader
        .lookup(addr)
        .with_context(|| format!("Query failed for: {}", ip))?;
    let found = result.is_some();

    if quiet {
        std::process::exit(if found { 0 } else { 1 });
    }

    // Always an array, empty when nothing matched
    match result {
        Some(hit) => {
            let network = covering_network(addr, hit.prefix_len);
            let mut value = data_value_to_json(&hit.data);
            if let serde_json::Value::Object(ref mut map) = value {
                if let Some(network) = network {
                    map.insert("cidr".to_string(), json!(network.to_string()));
                }
                map.insert("prefix_len".to_string(), json!(hit.prefix_len));
            }
            println!("{}", serde_json::to_string_pretty(&json!([value]))?);
        }
        None => println!("[]"),
    }

    std::process::exit(if found { 0 } else { 1 });
}

/// The network of `prefix_len` bits containing `addr`
fn covering_network(addr: IpAddr, prefix_len: u8) -> Option<Network> {
    let host = Network::from_ip(addr, if addr.is_ipv4() { 32 } else { 128 }).ok()?;
    let mut network = host;
    while network.family_prefix_len() > prefix_len {
        network = network.parent()?;
    }
    Some(network)
}
