//! Daemon configuration.
//!
//! Values come from an optional JSON file named by `MUJINA_CHAIN_CONFIG`,
//! then individual environment variables override what the file set.
//! Anything left unset keeps the stock controller defaults.

use std::collections::BTreeMap;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asic::inno::protocol::MAX_CHAIN_LENGTH;
use crate::asic::inno::commands::DEFAULT_POLL_TIMEOUT;
use crate::asic::inno::{ChipGeneration, PollConfig};
use crate::board::BoardPins;
use crate::chain::{ChainOptions, DetectConfig, DetectTiming};
use crate::chip::health::{DEFAULT_DISABLE_THRESHOLD, HealthPolicy};
use crate::peripheral::vid::MAX_VID_LEVEL;
use crate::thermal::{FanMode, ThermalConfig, ThermalSampler};
use crate::transport::SpiConfig;

pub const CONFIG_PATH_VAR: &str = "MUJINA_CHAIN_CONFIG";

const DEFAULT_GENERATION: &str = "a6";
const DEFAULT_TARGET_MHZ: u32 = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {name}={value:?}: {reason}")]
    Env {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown chip generation {name:?}, expected one of {known}")]
    UnknownGeneration { name: String, known: String },

    #[error("chip limit {0} exceeds the {MAX_CHAIN_LENGTH} chips a chain can address")]
    ChipLimit(usize),

    #[error("fan speed {0}% is above 100%")]
    FanSpeed(u8),

    #[error("VID level {0} is above {MAX_VID_LEVEL}")]
    VidLevel(u8),

    #[error(
        "temperature thresholds must rise: target {target}°C, hot {hot}°C, danger {danger}°C"
    )]
    Thresholds { target: f32, hot: f32, danger: f32 },
}

bitflags! {
    /// Chains the daemon drives. Bit `n` enables chain `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChainMask: u8 {
        const CHAIN0 = 1 << 0;
        const CHAIN1 = 1 << 1;
        const CHAIN2 = 1 << 2;
        const CHAIN3 = 1 << 3;
        const CHAIN4 = 1 << 4;
        const CHAIN5 = 1 << 5;
        const CHAIN6 = 1 << 6;
        const CHAIN7 = 1 << 7;
    }
}

impl Default for ChainMask {
    fn default() -> Self {
        Self::CHAIN0 | Self::CHAIN1 | Self::CHAIN2
    }
}

impl ChainMask {
    pub fn chains(self) -> impl Iterator<Item = u8> {
        (0..8u8).filter(move |n| self.bits() & (1 << n) != 0)
    }
}

impl FromStr for ChainMask {
    type Err = std::num::ParseIntError;

    /// Accepts decimal, `0x` hex or `0b` binary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bits = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u8::from_str_radix(hex, 16)?
        } else if let Some(bin) = s.strip_prefix("0b") {
            u8::from_str_radix(bin, 2)?
        } else {
            s.parse()?
        };
        Ok(Self::from_bits_retain(bits))
    }
}

/// Per-chain overrides. Unset fields fall back to the stock wiring for
/// that chain position.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChainOverride {
    pub spi: Option<SpiConfig>,
    pub pins: Option<BoardPins>,
    pub target_mhz: Option<u32>,
}

/// Fully resolved settings for one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    pub id: u8,
    pub spi: SpiConfig,
    pub pins: BoardPins,
    pub target_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub cooldown_secs: u64,
    pub disable_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let policy = HealthPolicy::default();
        Self {
            cooldown_secs: policy.cooldown.as_secs(),
            disable_threshold: DEFAULT_DISABLE_THRESHOLD,
        }
    }
}

impl From<&HealthConfig> for HealthPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(config.cooldown_secs),
            disable_threshold: config.disable_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `a4` or `a6`.
    pub generation: String,
    pub chain_mask: ChainMask,
    /// Requested core clock for every chain without its own override.
    pub target_mhz: u32,
    /// Applied once at startup when set.
    pub vid_level: Option<u8>,
    /// Overrides the SPI clock of every chain.
    pub spi_speed_hz: Option<u32>,
    /// Drive at most this many chips per chain, whatever BIST reports.
    pub chip_limit: Option<usize>,
    pub chains: BTreeMap<u8, ChainOverride>,

    pub poll_timeout_ms: u64,
    /// Bytes polled per response before giving up. Defaults to four per
    /// addressable chip of the generation.
    pub poll_max_bytes: Option<usize>,
    pub detect: DetectTiming,
    pub reset_queues_on_flush: bool,

    /// Worker sleep after a scan that moved nothing.
    pub idle_sleep_ms: u64,
    pub snapshot_interval_secs: u64,

    pub health: HealthConfig,
    pub thermal: ThermalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generation: DEFAULT_GENERATION.to_string(),
            chain_mask: ChainMask::default(),
            target_mhz: DEFAULT_TARGET_MHZ,
            vid_level: None,
            spi_speed_hz: None,
            chip_limit: None,
            chains: BTreeMap::new(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            poll_max_bytes: None,
            detect: DetectTiming::default(),
            reset_queues_on_flush: true,
            idle_sleep_ms: 10,
            snapshot_interval_secs: 60,
            health: HealthConfig::default(),
            thermal: ThermalConfig::default(),
        }
    }
}

impl Config {
    /// Read the file named by `MUJINA_CHAIN_CONFIG`, if any, apply
    /// environment overrides and validate the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var_os(CONFIG_PATH_VAR) {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                Self::from_json(&text)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(mask) = env_value::<ChainMask>("MUJINA_CHAIN_MASK")? {
            self.chain_mask = mask;
        }
        if let Ok(generation) = env::var("MUJINA_CHIP_GENERATION") {
            self.generation = generation;
        }
        if let Some(mhz) = env_value("MUJINA_PLL_MHZ")? {
            self.target_mhz = mhz;
            for chain in self.chains.values_mut() {
                chain.target_mhz = None;
            }
        }
        if let Some(level) = env_value("MUJINA_VID_LEVEL")? {
            self.vid_level = Some(level);
        }
        if let Some(hz) = env_value("MUJINA_SPI_SPEED_HZ")? {
            self.spi_speed_hz = Some(hz);
        }
        if let Some(limit) = env_value("MUJINA_CHIP_LIMIT")? {
            self.chip_limit = Some(limit);
        }
        if let Some(mode) = env_value::<FanMode>("MUJINA_FAN_MODE")? {
            self.thermal.fan_mode = mode;
        }
        if let Some(speed) = env_value("MUJINA_FAN_SPEED")? {
            self.thermal.manual_speed = speed;
            if env::var("MUJINA_FAN_MODE").is_err() {
                self.thermal.fan_mode = FanMode::Manual;
            }
        }
        if let Some(target) = env_value("MUJINA_TARGET_TEMP")? {
            self.thermal.target_temperature_c = target;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chip_generation()?;

        if let Some(limit) = self.chip_limit {
            if limit > MAX_CHAIN_LENGTH {
                return Err(ConfigError::ChipLimit(limit));
            }
        }
        let thermal = &self.thermal;
        for duty in [
            thermal.manual_speed,
            thermal.min_duty,
            thermal.warm_up_min_duty,
            thermal.hysteresis.high_duty,
            thermal.hysteresis.low_duty,
        ] {
            if duty > 100 {
                return Err(ConfigError::FanSpeed(duty));
            }
        }
        if let Some(level) = self.vid_level {
            if level > MAX_VID_LEVEL {
                return Err(ConfigError::VidLevel(level));
            }
        }

        if thermal.target_temperature_c >= thermal.hot_temperature_c
            || thermal.hot_temperature_c >= thermal.danger_temperature_c
        {
            return Err(ConfigError::Thresholds {
                target: thermal.target_temperature_c,
                hot: thermal.hot_temperature_c,
                danger: thermal.danger_temperature_c,
            });
        }
        Ok(())
    }

    pub fn chip_generation(&self) -> Result<&'static ChipGeneration, ConfigError> {
        ChipGeneration::find(&self.generation).ok_or_else(|| ConfigError::UnknownGeneration {
            name: self.generation.clone(),
            known: ChipGeneration::names().join(", "),
        })
    }

    /// Resolved settings for every enabled chain, in id order.
    pub fn enabled_chains(&self) -> Vec<ChainConfig> {
        self.chain_mask.chains().map(|id| self.chain(id)).collect()
    }

    /// Settings for chain `id`: its overrides on top of the stock wiring.
    pub fn chain(&self, id: u8) -> ChainConfig {
        let overrides = self.chains.get(&id).cloned().unwrap_or_default();
        let mut spi = overrides.spi.unwrap_or_else(|| SpiConfig {
            bus: id,
            ..Default::default()
        });
        if let Some(hz) = self.spi_speed_hz {
            spi.speed_hz = hz;
        }
        ChainConfig {
            id,
            spi,
            pins: overrides.pins.unwrap_or_else(|| BoardPins::for_chain(id)),
            target_mhz: overrides.target_mhz.unwrap_or(self.target_mhz),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_config(&self, generation: &ChipGeneration) -> PollConfig {
        let mut poll = PollConfig::for_generation(generation, self.poll_timeout());
        if let Some(max_bytes) = self.poll_max_bytes {
            poll.max_bytes = max_bytes;
        }
        poll
    }

    pub fn detect_config(&self, chain: &ChainConfig) -> DetectConfig {
        DetectConfig {
            target_mhz: chain.target_mhz,
            chip_limit: self.chip_limit,
            timing: self.detect.clone(),
        }
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            health: HealthPolicy::from(&self.health),
            reset_queues_on_flush: self.reset_queues_on_flush,
            ..Default::default()
        }
    }

    pub fn thermal_sampler(&self) -> ThermalSampler {
        ThermalSampler::new(
            self.thermal.full_sample_interval(),
            self.thermal.quick_sample_interval(),
            self.thermal.trim_fraction,
        )
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

/// Parse environment variable `name` if it is set.
fn env_value<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Ok(value) = env::var(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Env {
            name,
            value,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use test_case::test_case;

    use super::*;

    const VARS: &[&str] = &[
        CONFIG_PATH_VAR,
        "MUJINA_CHAIN_MASK",
        "MUJINA_CHIP_GENERATION",
        "MUJINA_PLL_MHZ",
        "MUJINA_VID_LEVEL",
        "MUJINA_SPI_SPEED_HZ",
        "MUJINA_CHIP_LIMIT",
        "MUJINA_FAN_MODE",
        "MUJINA_FAN_SPEED",
        "MUJINA_TARGET_TEMP",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: tests touching the environment are serialized.
            unsafe { env::remove_var(var) };
        }
    }

    fn set(name: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized.
        unsafe { env::set_var(name, value) };
    }

    #[test]
    #[serial]
    fn should_use_stock_defaults_without_file_or_env() {
        clear_env();
        let config = Config::load().unwrap();

        assert_eq!(config.chip_generation().unwrap().name, "a6");
        assert_eq!(
            config.enabled_chains().iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        let chain = config.chain(2);
        assert_eq!(chain.spi.device_path(), "/dev/spidev2.0");
        assert_eq!(chain.pins, BoardPins::for_chain(2));
        assert_eq!(chain.target_mhz, 1000);
    }

    #[test]
    #[serial]
    fn should_load_file_named_by_environment() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        std::fs::write(
            &path,
            r#"{
                "generation": "A4",
                "chain_mask": "CHAIN1",
                "chains": {"1": {"target_mhz": 800, "spi": {"bus": 3, "speed_hz": 1000000}}},
                "thermal": {"fan_mode": "hysteresis"}
            }"#,
        )
        .unwrap();
        set(CONFIG_PATH_VAR, path.to_str().unwrap());

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.chip_generation().unwrap().name, "a4");
        let chains = config.enabled_chains();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].id, 1);
        assert_eq!(chains[0].target_mhz, 800);
        assert_eq!(chains[0].spi.device_path(), "/dev/spidev3.0");
        assert_eq!(chains[0].spi.speed_hz, 1_000_000);
        assert_eq!(chains[0].spi.mode, 1);
        assert_eq!(config.thermal.fan_mode, FanMode::Hysteresis);
    }

    #[test]
    #[serial]
    fn should_let_environment_override_file() {
        clear_env();
        set("MUJINA_CHAIN_MASK", "0x5");
        set("MUJINA_PLL_MHZ", "900");
        set("MUJINA_SPI_SPEED_HZ", "500000");
        set("MUJINA_CHIP_LIMIT", "10");
        set("MUJINA_VID_LEVEL", "12");
        set("MUJINA_TARGET_TEMP", "70.5");

        let mut config =
            Config::from_json(r#"{"chains": {"0": {"target_mhz": 600}}}"#).unwrap();
        config.apply_env().unwrap();
        config.validate().unwrap();
        clear_env();

        let ids: Vec<u8> = config.enabled_chains().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(config.chain(0).target_mhz, 900);
        assert_eq!(config.chain(2).spi.speed_hz, 500_000);
        assert_eq!(config.detect_config(&config.chain(0)).chip_limit, Some(10));
        assert_eq!(config.vid_level, Some(12));
        assert_eq!(config.thermal.target_temperature_c, 70.5);
    }

    #[test]
    #[serial]
    fn should_switch_to_manual_when_only_speed_given() {
        clear_env();
        set("MUJINA_FAN_SPEED", "40");
        let mut config = Config::default();
        config.apply_env().unwrap();
        clear_env();

        assert_eq!(config.thermal.fan_mode, FanMode::Manual);
        assert_eq!(config.thermal.manual_speed, 40);
    }

    #[test]
    #[serial]
    fn should_report_unparseable_variable() {
        clear_env();
        set("MUJINA_CHIP_LIMIT", "many");
        let err = Config::default().apply_env().unwrap_err();
        clear_env();

        assert!(matches!(err, ConfigError::Env { name: "MUJINA_CHIP_LIMIT", .. }));
    }

    #[test_case("5", 0b101; "decimal")]
    #[test_case("0x06", 0b110; "hex")]
    #[test_case("0b1", 0b001; "binary")]
    fn should_parse_chain_mask(text: &str, bits: u8) {
        assert_eq!(ChainMask::from_str(text).unwrap().bits(), bits);
    }

    #[test]
    fn should_list_enabled_chains_in_order() {
        let mask = ChainMask::CHAIN7 | ChainMask::CHAIN0 | ChainMask::CHAIN3;
        assert_eq!(mask.chains().collect::<Vec<_>>(), vec![0, 3, 7]);
    }

    #[test]
    fn should_reject_unknown_generation() {
        let config = Config {
            generation: "a9".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownGeneration { .. })
        ));
    }

    #[test]
    fn should_reject_chip_limit_beyond_chain_length() {
        let config = Config {
            chip_limit: Some(65),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ChipLimit(65))));
    }

    #[test_case(r#"{"thermal": {"manual_speed": 101}}"#, 101; "manual speed")]
    #[test_case(r#"{"thermal": {"min_duty": 150}}"#, 150; "duty floor")]
    #[test_case(r#"{"thermal": {"warm_up_min_duty": 120}}"#, 120; "warm-up duty floor")]
    #[test_case(r#"{"thermal": {"hysteresis": {"high_duty": 200}}}"#, 200; "hysteresis high duty")]
    #[test_case(r#"{"thermal": {"hysteresis": {"low_duty": 101}}}"#, 101; "hysteresis low duty")]
    fn should_reject_fan_duty_above_full(json: &str, duty: u8) {
        let config = Config::from_json(json).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::FanSpeed(d)) if d == duty));
    }

    #[test]
    fn should_accept_full_duty_everywhere() {
        let mut config = Config::default();
        config.thermal.manual_speed = 100;
        config.thermal.min_duty = 100;
        config.thermal.warm_up_min_duty = 100;
        config.thermal.hysteresis.low_duty = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_default_poll_timeout_to_protocol_bound() {
        let config = Config::default();
        assert_eq!(config.poll_timeout(), DEFAULT_POLL_TIMEOUT);
        let generation = config.chip_generation().unwrap();
        assert_eq!(config.poll_config(generation).timeout, DEFAULT_POLL_TIMEOUT);
    }

    #[test_case(95.0, 95.0, 110.0; "target at hot")]
    #[test_case(75.0, 110.0, 110.0; "hot at danger")]
    #[test_case(100.0, 95.0, 110.0; "target above hot")]
    fn should_reject_thresholds_out_of_order(target: f32, hot: f32, danger: f32) {
        let mut config = Config::default();
        config.thermal.target_temperature_c = target;
        config.thermal.hot_temperature_c = hot;
        config.thermal.danger_temperature_c = danger;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Thresholds { .. })
        ));
    }

    #[test]
    fn should_map_health_settings_to_policy() {
        let config = Config::from_json(r#"{"health": {"cooldown_secs": 5}}"#).unwrap();
        let options = config.chain_options();
        assert_eq!(options.health.cooldown, Duration::from_secs(5));
        assert_eq!(options.health.disable_threshold, DEFAULT_DISABLE_THRESHOLD);
    }

    #[test]
    fn should_size_poll_bound_from_generation() {
        let config = Config::default();
        let generation = config.chip_generation().unwrap();
        assert_eq!(config.poll_config(generation).max_bytes, 256);
    }
}
