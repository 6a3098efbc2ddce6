//! Canned portfolio snapshot served while disconnected with nothing cached.
//!
//! Values match the demo book the terminal has always shipped, so a cold
//! disconnected start still renders a realistic portfolio.

use std::collections::BTreeMap;

use tdk_schemas::{PortfolioPosition, PortfolioSnapshot};

pub fn demo_portfolio_snapshot() -> PortfolioSnapshot {
    let positions = vec![
        PortfolioPosition {
            symbol: "AAPL".to_string(),
            quantity: 100,
            avg_cost: 150.00,
            current_price: 175.43,
            market_value: 17_543.00,
            pnl: 2_543.00,
            pnl_pct: 16.95,
        },
        PortfolioPosition {
            symbol: "TSLA".to_string(),
            quantity: 50,
            avg_cost: 220.00,
            current_price: 248.50,
            market_value: 12_425.00,
            pnl: 1_425.00,
            pnl_pct: 12.95,
        },
        PortfolioPosition {
            symbol: "NVDA".to_string(),
            quantity: 25,
            avg_cost: 380.00,
            current_price: 432.10,
            market_value: 10_802.50,
            pnl: 1_302.50,
            pnl_pct: 13.71,
        },
        PortfolioPosition {
            symbol: "META".to_string(),
            quantity: -30,
            avg_cost: 485.00,
            current_price: 475.20,
            market_value: -14_256.00,
            pnl: 294.00,
            pnl_pct: 2.02,
        },
    ];

    let account_summary: BTreeMap<String, f64> = [
        ("NetLiquidation".to_string(), 125_450.00),
        ("TotalCashValue".to_string(), 15_230.00),
        ("BuyingPower".to_string(), 45_690.00),
        ("UnrealizedPnL".to_string(), 5_564.50),
        ("RealizedPnL".to_string(), 1_250.00),
    ]
    .into_iter()
    .collect();

    PortfolioSnapshot {
        total_value: 125_450.00,
        day_change: 2_340.50,
        day_change_pct: 1.90,
        cash_balance: 15_230.00,
        buying_power: 45_690.00,
        positions,
        account_summary,
    }
}
