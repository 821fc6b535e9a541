//! Persistence layer.
//!
//! Lifetime statistics and the bot configuration are kept as pretty JSON
//! files. A missing file is a fresh start, not an error.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::config::BotConfiguration;
use crate::engine::accountant::StatisticsAggregate;

/// Default statistics file path.
pub const DEFAULT_STATISTICS_FILE: &str = "stakeflow_statistics.json";

/// Default configuration file path.
pub const DEFAULT_CONFIGURATION_FILE: &str = "stakeflow_bot.json";

fn write_json<T: Serialize>(value: &T, path: &str, what: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialise {what}"))?;
    std::fs::write(path, &json).with_context(|| format!("Failed to write {what} to {path}"))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &str, what: &str) -> Result<Option<T>> {
    if !Path::new(path).exists() {
        info!(path, "No saved {what} found, starting fresh");
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what} from {path}"))?;
    let value = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {what} from {path}"))?;
    Ok(Some(value))
}

/// Save lifetime statistics.
pub fn save_statistics(stats: &StatisticsAggregate, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATISTICS_FILE);
    write_json(stats, path, "statistics")?;
    debug!(path, runs = stats.runs, trades = stats.tally.trades, "Statistics saved");
    Ok(())
}

/// Load lifetime statistics. `None` when the file doesn't exist.
pub fn load_statistics(path: Option<&str>) -> Result<Option<StatisticsAggregate>> {
    let path = path.unwrap_or(DEFAULT_STATISTICS_FILE);
    let stats: Option<StatisticsAggregate> = read_json(path, "statistics")?;
    if let Some(s) = &stats {
        info!(
            path,
            runs = s.runs,
            trades = s.tally.trades,
            net = format!("{:+.2}", s.tally.net_profit()),
            "Statistics loaded from disk"
        );
    }
    Ok(stats)
}

/// Save a bot configuration.
pub fn save_configuration(config: &BotConfiguration, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_CONFIGURATION_FILE);
    write_json(config, path, "bot configuration")?;
    debug!(path, bot = %config.name, "Configuration saved");
    Ok(())
}

/// Load a bot configuration. The result is validated before it is
/// returned.
pub fn load_configuration(path: Option<&str>) -> Result<Option<BotConfiguration>> {
    let path = path.unwrap_or(DEFAULT_CONFIGURATION_FILE);
    let Some(config) = read_json::<BotConfiguration>(path, "bot configuration")? else {
        return Ok(None);
    };
    config
        .validate()
        .with_context(|| format!("Invalid bot configuration in {path}"))?;
    info!(path, bot = %config.name, id = %config.id, "Configuration loaded from disk");
    Ok(Some(config))
}

/// Delete a persisted file, if present.
pub fn delete_file(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to delete {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlternationSettings, MarketSettings};
    use crate::types::{Basis, ContractType, DurationUnit, TradeType};
    use rust_decimal_macros::dec;

    fn temp_path(kind: &str) -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("stakeflow_test_{kind}_{}.json", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    fn make_config() -> BotConfiguration {
        let market = MarketSettings {
            symbol: "R_50".into(),
            contract_type: ContractType::EvenOdd,
            trade_type: TradeType::Even,
            duration: 1,
            duration_unit: DurationUnit::Ticks,
            prediction: None,
            multiplier: None,
            allow_equals: false,
            basis: Basis::Stake,
            currency: "USD".into(),
            alternation: AlternationSettings::default(),
        };
        BotConfiguration::new("persisted", market, dec!(2.5))
    }

    #[test]
    fn test_statistics_round_trip() {
        let path = temp_path("stats");
        let mut stats = StatisticsAggregate::default();
        stats.runs = 3;
        stats.total_runtime_secs = 5_400;
        stats.tally.trades = 12;
        stats.tally.wins = 7;
        stats.tally.gross_profit = dec!(66.5);

        save_statistics(&stats, Some(&path)).unwrap();
        let loaded = load_statistics(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, stats);

        delete_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_statistics() {
        let loaded = load_statistics(Some("/tmp/stakeflow_missing_stats_12345.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_configuration_round_trip() {
        let path = temp_path("config");
        let config = make_config();
        save_configuration(&config, Some(&path)).unwrap();

        let loaded = load_configuration(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);

        delete_file(&path).unwrap();
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let path = temp_path("config");
        let mut config = make_config();
        config.amounts.base_stake = dec!(0);
        save_configuration(&config, Some(&path)).unwrap();

        let err = load_configuration(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Invalid bot configuration"));

        delete_file(&path).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let path = temp_path("stats");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_statistics(Some(&path)).is_err());
        delete_file(&path).unwrap();
    }

    #[test]
    fn test_delete_file() {
        let path = temp_path("stats");
        save_statistics(&StatisticsAggregate::default(), Some(&path)).unwrap();
        assert!(Path::new(&path).exists());

        delete_file(&path).unwrap();
        assert!(!Path::new(&path).exists());
        assert!(delete_file(&path).is_ok());
    }
}
