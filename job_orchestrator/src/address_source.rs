//! Wallet list loading from a `group_id,address` CSV file.

use serde::Serialize;
use solana_client::validate_address;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::{OrchestratorError, Result, WalletTarget};

const GROUP_COLUMNS: [&str; 3] = ["group_id", "wallet_id", "id"];
const ADDRESS_COLUMNS: [&str; 3] = ["address", "wallet", "wallet_address"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InvalidAddress {
    /// 1-based line in the file, header included
    pub line: u64,
    pub address: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AddressList {
    /// Valid, de-duplicated targets in file order
    pub wallets: Vec<WalletTarget>,
    pub invalid: Vec<InvalidAddress>,
}

pub fn load_addresses(path: impl AsRef<Path>) -> Result<AddressList> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        OrchestratorError::AddressSource(format!("cannot open {}: {}", path.display(), e))
    })?;
    let list = parse_addresses(file)?;
    info!(
        "Loaded {} wallets from {} ({} invalid)",
        list.wallets.len(),
        path.display(),
        list.invalid.len()
    );
    Ok(list)
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

pub fn parse_addresses<R: Read>(reader: R) -> Result<AddressList> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let group_col = find_column(&headers, &GROUP_COLUMNS)
        .ok_or_else(|| OrchestratorError::AddressSource("missing group_id column".to_string()))?;
    let address_col = find_column(&headers, &ADDRESS_COLUMNS)
        .ok_or_else(|| OrchestratorError::AddressSource("missing address column".to_string()))?;

    let mut list = AddressList::default();
    let mut seen = HashSet::new();

    for row in rdr.records() {
        let row = row?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        let group_id = row.get(group_col).unwrap_or_default();
        let raw = row.get(address_col).unwrap_or_default();

        if group_id.is_empty() && raw.is_empty() {
            continue;
        }

        match validate_address(raw) {
            Ok(address) => {
                if seen.insert(address.as_str().to_string()) {
                    list.wallets.push(WalletTarget::new(group_id, address.into_inner()));
                }
            }
            Err(e) => {
                warn!("Skipping invalid address '{}' on line {}: {}", raw, line, e);
                list.invalid.push(InvalidAddress {
                    line,
                    address: raw.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(list)
}
