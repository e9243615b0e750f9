//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, load_config)
//! - `credentials` - Stored Xero credentials (list, add)
//! - `budget` - Monthly budgets (set, list)
//! - `tenants` - Organisations reachable per credential
//! - `sync` - One-off sync run and report output
//! - `schedule` - Interval sync loop
//! - `actuals` - Stored actuals from previous syncs

pub mod actuals;
pub mod budget;
pub mod core;
pub mod credentials;
pub mod schedule;
pub mod sync;
pub mod tenants;

// Re-export command functions for main.rs
pub use actuals::*;
pub use budget::*;
pub use self::core::*;
pub use credentials::*;
pub use schedule::*;
pub use sync::*;
pub use tenants::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format an amount with thousands separators, e.g. -3,120.00
pub fn money(amount: f64) -> String {
    let formatted = format!("{:.2}", amount.abs());
    let (whole, frac) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac)
}
