//! mudlark: extract anomalous payloads from blockchain node storage into
//! SQLite, run detectors over them, and report on what turned up.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use mudlark_chains::{
    bitcoin::BitcoinExtractor, ethereum::EthereumExtractor, monero::MoneroExtractor, Extractor,
};
use mudlark_detect::{Analyzer, DetectorKind};
use mudlark_store::Chain;
use tracing::info;

mod view;

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ChainArg {
    BitcoinMainnet,
    BitcoinTestnet3,
    BitcoinRegtest,
    MoneroMainnet,
    MoneroStagenet,
    MoneroTestnet,
    EthereumMainnet,
}

impl From<ChainArg> for Chain {
    fn from(arg: ChainArg) -> Chain {
        match arg {
            ChainArg::BitcoinMainnet => Chain::BitcoinMainnet,
            ChainArg::BitcoinTestnet3 => Chain::BitcoinTestnet3,
            ChainArg::BitcoinRegtest => Chain::BitcoinRegtest,
            ChainArg::MoneroMainnet => Chain::MoneroMainnet,
            ChainArg::MoneroStagenet => Chain::MoneroStagenet,
            ChainArg::MoneroTestnet => Chain::MoneroTestnet,
            ChainArg::EthereumMainnet => Chain::EthereumMainnet,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum DetectorArg {
    NativeStrings,
    GnuStrings,
    ImghdrFiles,
    MagicFiles,
}

impl From<DetectorArg> for DetectorKind {
    fn from(arg: DetectorArg) -> DetectorKind {
        match arg {
            DetectorArg::NativeStrings => DetectorKind::NativeStrings,
            DetectorArg::GnuStrings => DetectorKind::GnuStrings,
            DetectorArg::ImghdrFiles => DetectorKind::ImghdrFiles,
            DetectorArg::MagicFiles => DetectorKind::MagicFiles,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ReportArg {
    AsciiHistogram,
    MagicFileHistogram,
    ImghdrFileHistogram,
    RecordStats,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract payloads from a node's data directory into the database
    Parse {
        /// Node data directory (e.g. ~/.bitcoin, ~/.bitmonero, ~/.ethereum)
        path: PathBuf,
    },
    /// Run a detector over previously extracted payloads
    Analyze {
        #[arg(value_enum)]
        detector: DetectorArg,
    },
    /// Render a report over the detection results
    View {
        #[arg(value_enum)]
        report: ReportArg,
    },
}

#[derive(Debug, Parser)]
#[clap(name = "mudlark")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
#[clap(about = "Mine non-protocol payloads out of blockchain node storage")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database holding extracted payloads and findings
    #[arg(long, global = true, default_value = "test.db")]
    database: PathBuf,

    /// Restrict the run to one chain (required for parse)
    #[arg(long, global = true, value_enum)]
    blockchain: Option<ChainArg>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let chain = cli.blockchain.map(Chain::from);

    match cli.command {
        Command::Parse { path } => {
            let Some(chain) = chain else {
                bail!("parse needs a --blockchain selector");
            };
            let summary = if chain.is_bitcoin() {
                BitcoinExtractor::new(chain)?.extract(&path, &cli.database)?
            } else if chain.is_monero() {
                MoneroExtractor::new(chain)?.extract(&path, &cli.database)?
            } else {
                EthereumExtractor::new(chain)?.extract(&path, &cli.database)?
            };
            info!(
                emitted = summary.emitted,
                skipped = summary.skipped_standard,
                written = summary.written,
                "parse complete"
            );
        }
        Command::Analyze { detector } => {
            let summary = Analyzer::new(&cli.database, chain)
                .analyze(detector.into())
                .context("detection pass failed")?;
            info!(
                scanned = summary.scanned,
                findings = summary.findings,
                "analyze complete"
            );
        }
        Command::View { report } => {
            view::render(&cli.database, chain, report)?;
        }
    }

    Ok(())
}
