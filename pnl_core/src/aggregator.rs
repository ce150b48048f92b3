//! Snapshot-based profit and loss.
//!
//! The earliest stored snapshot of a wallet is its cost basis. Current
//! holdings come from the wallet record and are valued at the latest cached
//! price per mint. Deposits or withdrawals after the basis are not corrected
//! for, so they show up as PnL.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{PortfolioSnapshot, WalletRecord};
use crate::{NATIVE_MINT, NATIVE_SYMBOL};

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPnl {
    pub wallet_address: String,
    pub mint: String,
    pub symbol: Option<String>,
    pub initial_amount: Decimal,
    pub current_amount: Decimal,
    pub initial_price: Decimal,
    pub current_price: Decimal,
    pub initial_value: Decimal,
    pub current_value: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletPnl {
    pub address: String,
    pub group_id: String,
    pub basis_timestamp: DateTime<Utc>,
    pub initial_value: Decimal,
    pub current_value: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub tokens: Vec<TokenPnl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombinedPnl {
    pub wallet_count: usize,
    pub total_initial_value: Decimal,
    pub total_current_value: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_percentage: Decimal,
    pub top_gainers: Vec<TokenPnl>,
    pub top_losers: Vec<TokenPnl>,
}

/// `total / initial * 100`, or 0 when there is no initial value
pub fn pnl_percentage(total_pnl: Decimal, initial_value: Decimal) -> Decimal {
    if initial_value.is_zero() {
        return Decimal::ZERO;
    }
    total_pnl / initial_value * Decimal::ONE_HUNDRED
}

/// Position as of the basis snapshot
struct BasisPosition {
    amount: Decimal,
    value: Decimal,
    symbol: Option<String>,
}

/// Compute one wallet's PnL against its basis snapshot.
///
/// `prices` maps mint to the latest cached USD price; the native balance is
/// valued at `prices[NATIVE_MINT]`. A held mint with no cached price falls
/// back to the price implied by its enriched value, then to its basis price.
pub fn wallet_pnl(
    record: &WalletRecord,
    basis: &PortfolioSnapshot,
    prices: &HashMap<String, Decimal>,
) -> WalletPnl {
    let mut order: Vec<String> = Vec::new();
    let mut initial: HashMap<String, BasisPosition> = HashMap::new();

    order.push(NATIVE_MINT.to_string());
    initial.insert(
        NATIVE_MINT.to_string(),
        BasisPosition {
            amount: basis.native_balance,
            value: basis.native_usd_value(),
            symbol: Some(NATIVE_SYMBOL.to_string()),
        },
    );
    for holding in &basis.tokens {
        let entry = initial.entry(holding.mint.clone()).or_insert_with(|| {
            order.push(holding.mint.clone());
            BasisPosition {
                amount: Decimal::ZERO,
                value: Decimal::ZERO,
                symbol: holding.symbol.clone(),
            }
        });
        entry.amount += holding.amount;
        entry.value += holding.usd_value.unwrap_or(Decimal::ZERO);
    }

    let mut current: HashMap<String, (Decimal, Option<Decimal>, Option<String>)> = HashMap::new();
    current.insert(
        NATIVE_MINT.to_string(),
        (record.native_balance, None, Some(NATIVE_SYMBOL.to_string())),
    );
    for holding in &record.tokens {
        if !initial.contains_key(&holding.mint) && !current.contains_key(&holding.mint) {
            order.push(holding.mint.clone());
        }
        let entry = current
            .entry(holding.mint.clone())
            .or_insert((Decimal::ZERO, None, holding.symbol.clone()));
        entry.0 += holding.amount;
        if let Some(value) = holding.usd_value {
            entry.1 = Some(entry.1.unwrap_or(Decimal::ZERO) + value);
        }
    }

    let tokens: Vec<TokenPnl> = order
        .iter()
        .map(|mint| {
            let basis_position = initial.get(mint);
            let (current_amount, enriched_value, current_symbol) = current
                .get(mint)
                .cloned()
                .unwrap_or((Decimal::ZERO, None, None));

            let initial_amount = basis_position.map(|b| b.amount).unwrap_or(Decimal::ZERO);
            let initial_value = basis_position.map(|b| b.value).unwrap_or(Decimal::ZERO);
            let initial_price = if initial_amount.is_zero() {
                Decimal::ZERO
            } else {
                initial_value / initial_amount
            };

            let current_price = prices.get(mint).copied().unwrap_or_else(|| {
                match enriched_value {
                    Some(value) if !current_amount.is_zero() => value / current_amount,
                    _ => initial_price,
                }
            });
            let current_value = current_amount * current_price;
            let delta = current_price - initial_price;

            let (realized_pnl, unrealized_pnl) = if basis_position.is_some() {
                let sold = (initial_amount - current_amount).max(Decimal::ZERO);
                let held = initial_amount.min(current_amount);
                (sold * delta, held * delta)
            } else {
                // acquired after the basis: the whole position counts as gain
                (Decimal::ZERO, current_value)
            };

            TokenPnl {
                wallet_address: record.address.clone(),
                mint: mint.clone(),
                symbol: current_symbol.or_else(|| basis_position.and_then(|b| b.symbol.clone())),
                initial_amount,
                current_amount,
                initial_price,
                current_price,
                initial_value,
                current_value,
                realized_pnl,
                unrealized_pnl,
                total_pnl: realized_pnl + unrealized_pnl,
            }
        })
        .collect();

    let initial_value: Decimal = tokens.iter().map(|t| t.initial_value).sum();
    let current_value: Decimal = tokens.iter().map(|t| t.current_value).sum();
    let realized_pnl: Decimal = tokens.iter().map(|t| t.realized_pnl).sum();
    let unrealized_pnl: Decimal = tokens.iter().map(|t| t.unrealized_pnl).sum();
    let total_pnl = realized_pnl + unrealized_pnl;

    WalletPnl {
        address: record.address.clone(),
        group_id: record.group_id.clone(),
        basis_timestamp: basis.timestamp,
        initial_value,
        current_value,
        realized_pnl,
        unrealized_pnl,
        total_pnl,
        pnl_percentage: pnl_percentage(total_pnl, initial_value),
        tokens,
    }
}

/// Fold per-wallet results into portfolio totals and the top movers
pub fn combine(wallets: &[WalletPnl], top_n: usize) -> CombinedPnl {
    let total_initial_value: Decimal = wallets.iter().map(|w| w.initial_value).sum();
    let total_current_value: Decimal = wallets.iter().map(|w| w.current_value).sum();
    let total_realized_pnl: Decimal = wallets.iter().map(|w| w.realized_pnl).sum();
    let total_unrealized_pnl: Decimal = wallets.iter().map(|w| w.unrealized_pnl).sum();
    let total_pnl = total_realized_pnl + total_unrealized_pnl;

    let rows: Vec<&TokenPnl> = wallets.iter().flat_map(|w| w.tokens.iter()).collect();

    let mut gainers = rows.clone();
    gainers.sort_by(|a, b| b.total_pnl.cmp(&a.total_pnl));
    let mut losers = rows;
    losers.sort_by(|a, b| a.total_pnl.cmp(&b.total_pnl));

    CombinedPnl {
        wallet_count: wallets.len(),
        total_initial_value,
        total_current_value,
        total_realized_pnl,
        total_unrealized_pnl,
        total_pnl,
        total_pnl_percentage: pnl_percentage(total_pnl, total_initial_value),
        top_gainers: gainers.into_iter().take(top_n).cloned().collect(),
        top_losers: losers.into_iter().take(top_n).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SnapshotKind, TokenHolding};
    use rust_decimal_macros::dec;

    fn holding(mint: &str, amount: Decimal, usd_value: Decimal) -> TokenHolding {
        TokenHolding {
            mint: mint.to_string(),
            amount,
            decimals: 6,
            symbol: Some(mint.to_string()),
            name: None,
            usd_value: Some(usd_value),
        }
    }

    fn basis_for(record: &WalletRecord, native_price: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot::from_record(record, native_price, SnapshotKind::Initial)
    }

    #[test]
    fn test_percentage_is_zero_without_initial_value() {
        assert_eq!(pnl_percentage(dec!(25), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(pnl_percentage(dec!(25), dec!(100)), dec!(25));
    }

    #[test]
    fn test_unchanged_wallet_has_no_pnl() {
        let record = WalletRecord::success("w1", "g", dec!(2), vec![holding("M1", dec!(100), dec!(50))]);
        let basis = basis_for(&record, dec!(100));
        let prices = HashMap::from([
            (NATIVE_MINT.to_string(), dec!(100)),
            ("M1".to_string(), dec!(0.5)),
        ]);

        let pnl = wallet_pnl(&record, &basis, &prices);
        assert_eq!(pnl.initial_value, dec!(250));
        assert_eq!(pnl.current_value, dec!(250));
        assert_eq!(pnl.total_pnl, Decimal::ZERO);
        assert_eq!(pnl.tokens.len(), 2);
        assert_eq!(pnl.tokens[0].symbol.as_deref(), Some(NATIVE_SYMBOL));
    }

    #[test]
    fn test_partial_sale_splits_realized_and_unrealized() {
        let initial = WalletRecord::success("w1", "g", dec!(0), vec![holding("M1", dec!(100), dec!(100))]);
        let basis = basis_for(&initial, dec!(100));

        // sold 40 of 100, price doubled from $1 to $2
        let now = WalletRecord::success("w1", "g", dec!(0), vec![holding("M1", dec!(60), dec!(120))]);
        let prices = HashMap::from([("M1".to_string(), dec!(2))]);

        let pnl = wallet_pnl(&now, &basis, &prices);
        let m1 = pnl.tokens.iter().find(|t| t.mint == "M1").unwrap();
        assert_eq!(m1.initial_price, dec!(1));
        assert_eq!(m1.realized_pnl, dec!(40));
        assert_eq!(m1.unrealized_pnl, dec!(60));
        assert_eq!(m1.total_pnl, dec!(100));
        assert_eq!(pnl.pnl_percentage, dec!(100));
    }

    #[test]
    fn test_new_position_counts_current_value_as_gain() {
        let initial = WalletRecord::success("w1", "g", dec!(1), vec![]);
        let basis = basis_for(&initial, dec!(100));
        let now = WalletRecord::success("w1", "g", dec!(1), vec![holding("NEW", dec!(10), dec!(30))]);
        let prices = HashMap::from([
            (NATIVE_MINT.to_string(), dec!(100)),
            ("NEW".to_string(), dec!(3)),
        ]);

        let pnl = wallet_pnl(&now, &basis, &prices);
        let new = pnl.tokens.iter().find(|t| t.mint == "NEW").unwrap();
        assert_eq!(new.initial_value, Decimal::ZERO);
        assert_eq!(new.unrealized_pnl, dec!(30));
        assert_eq!(pnl.total_pnl, dec!(30));
    }

    #[test]
    fn test_combine_orders_gainers_and_losers() {
        let mk = |address: &str, mint: &str, from: Decimal, to: Decimal| {
            let initial = WalletRecord::success(address, "g", dec!(0), vec![holding(mint, dec!(1), from)]);
            let basis = basis_for(&initial, Decimal::ZERO);
            let now = WalletRecord::success(address, "g", dec!(0), vec![holding(mint, dec!(1), to)]);
            let prices = HashMap::from([(mint.to_string(), to), (NATIVE_MINT.to_string(), Decimal::ZERO)]);
            wallet_pnl(&now, &basis, &prices)
        };
        let wallets = vec![
            mk("w1", "UP", dec!(10), dec!(30)),
            mk("w2", "DOWN", dec!(10), dec!(2)),
            mk("w3", "FLAT", dec!(10), dec!(10)),
        ];

        let combined = combine(&wallets, 1);
        assert_eq!(combined.wallet_count, 3);
        assert_eq!(combined.total_initial_value, dec!(30));
        assert_eq!(combined.total_current_value, dec!(42));
        assert_eq!(combined.total_pnl, dec!(12));
        assert_eq!(combined.total_pnl_percentage, dec!(40));
        assert_eq!(combined.top_gainers.len(), 1);
        assert_eq!(combined.top_gainers[0].mint, "UP");
        assert_eq!(combined.top_losers[0].mint, "DOWN");
    }

    #[test]
    fn test_combine_empty_is_zero() {
        let combined = combine(&[], DEFAULT_TOP_N);
        assert_eq!(combined.total_pnl_percentage, Decimal::ZERO);
        assert!(combined.top_gainers.is_empty());
    }
}
