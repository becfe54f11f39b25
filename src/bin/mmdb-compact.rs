mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{cmd_compact, cmd_inspect, cmd_query, CompactArgs};

#[derive(Parser)]
#[command(name = "mmdb-compact")]
#[command(
    about = "Shrink a MaxMind DB file down to a set of countries",
    long_about = "mmdb-compact - Decode, filter and re-encode MMDB databases\n\n\
    Reads an MMDB file (such as IPinfo's country database), keeps the networks whose\n\
    country is in the requested set, merges sibling networks with identical records\n\
    and writes a smaller MMDB file with the same lookup results for those countries.\n\n\
    Examples:\n\
      mmdb-compact compact --source ipinfo.country.mmdb --countries CN HK\n\
      mmdb-compact compact --output lite.mmdb --ipv4-only\n\
      mmdb-compact inspect ipinfo.lite.mmdb --countries\n\
      mmdb-compact query ipinfo.lite.mmdb 1.2.3.4"
)]
#[command(version)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a country-filtered database from a source database
    Compact {
        /// Source MMDB file (downloaded from --url when omitted)
        #[arg(short, long, value_name = "FILE")]
        source: Option<PathBuf>,

        /// Download location of the source database
        #[arg(long, value_name = "URL", conflicts_with = "source")]
        url: Option<String>,

        /// Output database file
        #[arg(short, long, value_name = "FILE", default_value = "ipinfo.lite.mmdb")]
        output: PathBuf,

        /// Country codes to keep (default: CN HK US JP SG)
        #[arg(short, long, num_args = 1.., value_name = "CC")]
        countries: Vec<String>,

        /// JSON settings file; flags override its values
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Drop native IPv6 networks and keep only the IPv4 range
        #[arg(long)]
        ipv4_only: bool,

        /// Custom database type name for metadata
        #[arg(short = 't', long, value_name = "NAME")]
        database_type: Option<String>,

        /// Build epoch for metadata (default: the source's)
        #[arg(long, value_name = "SECONDS")]
        build_epoch: Option<u64>,

        /// Number of worker threads for the tree walk (1 walks sequentially)
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },

    /// Show metadata of a database
    Inspect {
        /// Path to the MMDB file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Also count networks per country
        #[arg(short, long)]
        countries: bool,
    },

    /// Look up an IP address
    Query {
        /// Path to the MMDB file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IPv4 or IPv6 address
        #[arg(value_name = "IP")]
        ip: String,

        /// Quiet mode - no output, only exit code (0 = found, 1 = not found)
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Compact {
            source,
            url,
            output,
            countries,
            config,
            ipv4_only,
            database_type,
            build_epoch,
            threads,
        } => cmd_compact(CompactArgs {
            source,
            url,
            output,
            countries,
            config,
            ipv4_only,
            database_type,
            build_epoch,
            threads,
        }),
        Commands::Inspect {
            database,
            json,
            countries,
        } => cmd_inspect(database, json, countries),
        Commands::Query {
            database,
            ip,
            quiet,
        } => cmd_query(database, ip, quiet),
    }
}
