//! Coin package catalog.
//!
//! Purchases arrive via the payment webhook carrying a coin amount; only
//! amounts matching a known package are accepted before the credit touches
//! the ledger.

use serde::Serialize;

use coinledger_core::{LedgerError, LedgerResult};

/// A purchasable coin bundle. Prices are in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoinPackage {
    pub id: &'static str,
    pub coins: u64,
    pub price_minor: u64,
}

/// 1 coin = 1000 minor units.
pub const COIN_PACKAGES: [CoinPackage; 4] = [
    CoinPackage {
        id: "coins-500",
        coins: 500,
        price_minor: 500_000,
    },
    CoinPackage {
        id: "coins-1000",
        coins: 1_000,
        price_minor: 1_000_000,
    },
    CoinPackage {
        id: "coins-2500",
        coins: 2_500,
        price_minor: 2_500_000,
    },
    CoinPackage {
        id: "coins-5000",
        coins: 5_000,
        price_minor: 5_000_000,
    },
];

/// Resolve the package a purchase credit corresponds to, rejecting amounts
/// that match no known package.
pub fn package_for_purchase(coins: u64) -> LedgerResult<CoinPackage> {
    COIN_PACKAGES
        .iter()
        .find(|pkg| pkg.coins == coins)
        .copied()
        .ok_or_else(|| LedgerError::validation(format!("no coin package grants {coins} coins")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_amount_resolves() {
        for pkg in COIN_PACKAGES {
            assert_eq!(package_for_purchase(pkg.coins).unwrap(), pkg);
        }
    }

    #[test]
    fn unknown_amounts_are_rejected() {
        assert!(package_for_purchase(0).is_err());
        assert!(package_for_purchase(750).is_err());
        assert!(package_for_purchase(1_000_000).is_err());
    }
}
