use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::decimal::Money;
use crate::errors::{ReconError, Result};

/// how the invoicing guard reacts to period overlaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardMode {
    /// overlaps fail invoice creation and batch assembly
    Strict,
    /// overlaps are logged and flagged but allowed through
    Warn,
}

impl FromStr for GuardMode {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(GuardMode::Strict),
            "warn" => Ok(GuardMode::Warn),
            other => Err(ReconError::InvalidConfiguration {
                message: format!("unknown guard mode: {other}"),
            }),
        }
    }
}

/// runtime configuration for the reconciliation core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    /// strict-vs-warn toggle for the invoicing guard
    pub guard_mode: GuardMode,
    /// monetary equality margin ε; bank rounding only
    pub amount_tolerance: Money,
    /// matcher date window around the transaction date, in days
    pub match_window_days: i64,
    /// maximum candidate batches entering the subset search
    pub k_max: usize,
    /// maximum subsets the search may produce before giving up
    pub c_max: usize,
    /// advisory lock time-to-live in seconds
    pub lock_ttl_secs: i64,
    /// case-insensitive substrings identifying a membership line
    pub membership_tokens: Vec<String>,
    /// billing-period generation horizon in years
    pub horizon_years: u32,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            guard_mode: GuardMode::Strict,
            amount_tolerance: Money::from_minor(2),
            match_window_days: 5,
            k_max: 32,
            c_max: 16,
            lock_ttl_secs: 300,
            membership_tokens: vec![
                "membership".to_string(),
                "subscription".to_string(),
                "contribution".to_string(),
            ],
            horizon_years: 1,
        }
    }
}

impl ReconConfig {
    /// strict guard configuration (the default)
    pub fn strict() -> Self {
        Self::default()
    }

    /// warn-mode guard configuration
    pub fn warn() -> Self {
        Self {
            guard_mode: GuardMode::Warn,
            ..Self::default()
        }
    }

    /// read the environment surface; unset variables keep their defaults
    ///
    /// MEMBERSHIP_GUARD_MODE, MEMBERSHIP_AMOUNT_TOLERANCE,
    /// MEMBERSHIP_MATCH_WINDOW_DAYS, MEMBERSHIP_MATCH_K_MAX,
    /// MEMBERSHIP_MATCH_C_MAX, MEMBERSHIP_LOCK_TTL_SECS,
    /// MEMBERSHIP_ITEM_TOKENS (comma-separated)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var("MEMBERSHIP_GUARD_MODE") {
            config.guard_mode = mode.parse()?;
        }
        if let Ok(tolerance) = std::env::var("MEMBERSHIP_AMOUNT_TOLERANCE") {
            config.amount_tolerance =
                Money::from_str_exact(&tolerance).map_err(|e| ReconError::InvalidConfiguration {
                    message: format!("MEMBERSHIP_AMOUNT_TOLERANCE: {e}"),
                })?;
        }
        if let Ok(days) = std::env::var("MEMBERSHIP_MATCH_WINDOW_DAYS") {
            config.match_window_days = parse_env("MEMBERSHIP_MATCH_WINDOW_DAYS", &days)?;
        }
        if let Ok(k) = std::env::var("MEMBERSHIP_MATCH_K_MAX") {
            config.k_max = parse_env("MEMBERSHIP_MATCH_K_MAX", &k)?;
        }
        if let Ok(c) = std::env::var("MEMBERSHIP_MATCH_C_MAX") {
            config.c_max = parse_env("MEMBERSHIP_MATCH_C_MAX", &c)?;
        }
        if let Ok(ttl) = std::env::var("MEMBERSHIP_LOCK_TTL_SECS") {
            config.lock_ttl_secs = parse_env("MEMBERSHIP_LOCK_TTL_SECS", &ttl)?;
        }
        if let Ok(tokens) = std::env::var("MEMBERSHIP_ITEM_TOKENS") {
            config.membership_tokens = tokens
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }

        Ok(config)
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ReconError::InvalidConfiguration {
            message: format!("{name}: cannot parse '{value}'"),
        })
}
