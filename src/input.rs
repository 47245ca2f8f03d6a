//! Recipient/amount list parsing.
//!
//! Users paste lists straight out of spreadsheets, block explorers or JSON
//! arrays. The normalizer never fails; it only drops decoration and empty
//! entries. Anything semantically wrong is left for the validator and the
//! submitter to report.

use crate::utils;
use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Characters stripped before splitting, so `["0xa","0xb"]` pastes cleanly.
const DECORATION: [char; 3] = ['[', ']', '"'];

/// Split one raw comma-separated field into trimmed, non-empty entries.
pub fn split_list(raw: &str) -> Vec<String> {
    let cleaned: String = raw.chars().filter(|c| !DECORATION.contains(c)).collect();
    cleaned
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize the address and amount fields into ordered lists.
///
/// Order is preserved and duplicates are kept; the two lists are not required
/// to have the same length here.
pub fn normalize(raw_addresses: &str, raw_amounts: &str) -> (Vec<String>, Vec<String>) {
    (split_list(raw_addresses), split_list(raw_amounts))
}

/// Read `address,amount` rows from CSV.
///
/// The first row is skipped as a header only when it holds neither an address
/// nor an amount. Blank rows are ignored.
pub fn load_csv<R: Read>(reader: R) -> Result<(Vec<String>, Vec<String>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut addresses = Vec::new();
    let mut amounts = Vec::new();

    for (row_idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Row {}: unreadable CSV", row_idx + 1))?;
        let cells: Vec<&str> = record.iter().filter(|c| !c.is_empty()).collect();
        if cells.is_empty() {
            continue;
        }

        if row_idx == 0 && is_header(&cells) {
            tracing::debug!("Skipping CSV header row: {:?}", cells);
            continue;
        }

        if cells.len() != 2 {
            return Err(anyhow!(
                "Row {}: expected `address,amount`, got {} columns",
                row_idx + 1,
                cells.len()
            ));
        }

        addresses.push(cells[0].to_string());
        amounts.push(cells[1].to_string());
    }

    Ok((addresses, amounts))
}

fn is_header(cells: &[&str]) -> bool {
    let address_like = cells[0].parse::<Address>().is_ok();
    let amount_like = cells
        .get(1)
        .map_or(false, |cell| utils::to_base_units(cell, utils::NATIVE_DECIMALS).is_ok());
    !address_like && !amount_like
}

/// Read `address,amount` rows from a CSV file on disk.
pub fn load_csv_file(path: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let lists = load_csv(file)?;
    tracing::info!("Loaded {} rows from {}", lists.0.len(), path.display());
    Ok(lists)
}
