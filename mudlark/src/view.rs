//! Text renditions of the reports: a table on stdout, the same rows as a
//! CSV sibling file for anything that wants to plot them.

use std::fmt::Write as _;
use std::path::Path;

use mudlark_store::{Chain, FileFindingTable, Store};
use tracing::info;

use crate::ReportArg;

/// Accumulated-minimum rows rendered below the ascii histogram.
const ACCUMULATED_ROWS: u64 = 34;

pub fn render(db_path: &Path, chain: Option<Chain>, report: ReportArg) -> anyhow::Result<()> {
    let store = Store::open(db_path)?;
    let scope = chain.map(|c| c.to_string()).unwrap_or_else(|| "all".into());

    let (stem, csv) = match report {
        ReportArg::AsciiHistogram => ("ascii_histogram", ascii_histogram(&store, chain)?),
        ReportArg::MagicFileHistogram => (
            "magic_file_histogram",
            file_histogram(&store, FileFindingTable::Magic, chain)?,
        ),
        ReportArg::ImghdrFileHistogram => (
            "imghdr_file_histogram",
            file_histogram(&store, FileFindingTable::Imghdr, chain)?,
        ),
        ReportArg::RecordStats => ("record_stats", record_stats(&store, chain)?),
    };

    let csv_path = format!("{stem}_{scope}.csv");
    std::fs::write(&csv_path, csv)?;
    info!(path = csv_path, "report written");
    Ok(())
}

fn ascii_histogram(store: &Store, chain: Option<Chain>) -> anyhow::Result<String> {
    let rows = store.ascii_histogram(chain)?;

    println!("string_length  count");
    for (length, count) in &rows {
        println!("{length:>13}  {count}");
    }

    // How many strings survive as the minimum length rises; mirrors the
    // second panel of the plotted report.
    let base = rows.first().map(|(length, _)| *length).unwrap_or(10);
    println!();
    println!("min_length  strings_at_least");
    let mut csv = String::from("string_length,count\n");
    for (length, count) in &rows {
        let _ = writeln!(csv, "{length},{count}");
    }
    for min in base..base + ACCUMULATED_ROWS {
        let at_least: u64 = rows
            .iter()
            .filter(|(length, _)| *length >= min)
            .map(|(_, count)| count)
            .sum();
        println!("{min:>10}  {at_least}");
    }

    Ok(csv)
}

fn file_histogram(
    store: &Store,
    table: FileFindingTable,
    chain: Option<Chain>,
) -> anyhow::Result<String> {
    let rows = store.file_histogram(table, chain)?;

    println!("{:<40}  count", "file_type");
    let mut csv = String::from("file_type,count\n");
    for (file_type, count) in &rows {
        let truncated = if file_type.len() > 40 {
            format!("{}.", &file_type[..39])
        } else {
            file_type.clone()
        };
        println!("{truncated:<40}  {count}");
        let _ = writeln!(csv, "{},{count}", file_type.replace(',', ";"));
    }

    Ok(csv)
}

fn record_stats(store: &Store, chain: Option<Chain>) -> anyhow::Result<String> {
    let stats = store.record_stats(chain)?;

    println!("raw records:        {}", stats.raw_records);
    for (kind, count) in &stats.per_kind {
        println!("  {kind:<17} {count}");
    }
    println!("ascii findings:     {}", stats.ascii_findings);
    println!("max string length:  {}", stats.max_string_length);
    println!("magic findings:     {}", stats.magic_findings);
    println!("imghdr findings:    {}", stats.imghdr_findings);

    let mut csv = String::from("stat,value\n");
    let _ = writeln!(csv, "raw_records,{}", stats.raw_records);
    for (kind, count) in &stats.per_kind {
        let _ = writeln!(csv, "raw_{kind},{count}");
    }
    let _ = writeln!(csv, "ascii_findings,{}", stats.ascii_findings);
    let _ = writeln!(csv, "max_string_length,{}", stats.max_string_length);
    let _ = writeln!(csv, "magic_findings,{}", stats.magic_findings);
    let _ = writeln!(csv, "imghdr_findings,{}", stats.imghdr_findings);

    Ok(csv)
}
