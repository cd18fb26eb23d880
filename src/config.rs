//! INI-style configuration loading, CLI parsing, and defaults/precedence merging.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

use crate::ops::{Op, OperationMask};
use crate::plan::{CorruptionFault, CountFault, DelayFault, ErrorFault, FaultPlan, PartialFault, TimingFault};

/// Startup-time configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid value {value:?} for {key} in [{section}]")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// The global settings outside the six fault sections.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_path: PathBuf,
    pub mount_point: PathBuf,
    pub log_file: String,
    pub log_level: u8,
    pub enable_fault_injection: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            storage_path: PathBuf::from("/var/nas-storage"),
            mount_point: PathBuf::from("/mnt/nas-mount"),
            log_file: "stdout".to_string(),
            log_level: 2,
            enable_fault_injection: false,
        }
    }
}

/// The fully-resolved startup configuration: global settings plus the fault plan.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub plan: FaultPlan,
}

/// `--auto-unmount`/`--allow-root` and the rest of spec.md §6's CLI surface.
#[derive(Debug, Parser)]
#[command(name = "faultfs", about = "A pass-through FUSE filesystem with fault injection")]
pub struct Cli {
    /// Where to mount the filesystem.
    pub mountpoint: PathBuf,

    /// Backing directory the filesystem serves operations against.
    #[arg(long = "storage")]
    pub storage: Option<PathBuf>,

    /// Log destination, a file path or "stdout".
    #[arg(long = "log")]
    pub log: Option<String>,

    /// Log verbosity, 0 (error) through 3 (debug).
    #[arg(long = "loglevel")]
    pub loglevel: Option<u8>,

    /// Path to an INI fault-plan configuration file.
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Automatically unmount on process exit.
    #[arg(long = "auto-unmount", default_value_t = false)]
    pub auto_unmount: bool,

    /// Allow root to access files mounted by another user.
    #[arg(long = "allow-root", default_value_t = false)]
    pub allow_root: bool,
}

/// Build the effective [`Config`] from CLI args, environment variables, and an optional
/// config file, applying the precedence documented in the expanded specification: config file
/// is the base (on top of built-in defaults), environment variables override it, and the CLI
/// overrides both.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    let mut settings = Settings::default();
    let mut plan = FaultPlan::default();

    if let Some(path) = &cli.config {
        load_ini(path, &mut settings, &mut plan)?;
    }

    apply_env(&mut settings);

    if let Some(storage) = &cli.storage {
        settings.storage_path = storage.clone();
    }
    settings.mount_point = cli.mountpoint.clone();
    if let Some(log) = &cli.log {
        settings.log_file = log.clone();
    }
    if let Some(level) = cli.loglevel {
        settings.log_level = level;
    }

    Ok(Config { settings, plan })
}

fn apply_env(settings: &mut Settings) {
    if let Ok(v) = std::env::var("MOUNT_POINT") {
        settings.mount_point = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("STORAGE_PATH") {
        settings.storage_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("LOG_FILE") {
        settings.log_file = v;
    }
    if let Ok(v) = std::env::var("LOG_LEVEL") {
        if let Ok(level) = v.parse() {
            settings.log_level = level;
        }
    }
}

fn load_ini(path: &Path, settings: &mut Settings, plan: &mut FaultPlan) -> Result<(), ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut section = String::new();

    for raw_line in text.lines() {
        let line = raw_line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            if let Some(end) = line.find(']') {
                section = line[1..end].to_string();
                populate_section_defaults(&section, plan);
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = strip_trailing_comment(value.trim());

        if section.is_empty() {
            apply_global_key(settings, key, value)?;
        } else {
            apply_fault_key(plan, &section, key, value)?;
        }
    }

    Ok(())
}

fn strip_trailing_comment(value: &str) -> &str {
    match value.find('#') {
        Some(idx) => value[..idx].trim_end(),
        None => value,
    }
}

fn populate_section_defaults(section: &str, plan: &mut FaultPlan) {
    match section {
        "error_fault" if plan.error.is_none() => {
            plan.error = Some(ErrorFault {
                probability: 0.5,
                error_code: -libc::EIO,
                mask: OperationMask::all(),
            });
        }
        "corruption_fault" if plan.corruption.is_none() => {
            plan.corruption = Some(CorruptionFault {
                probability: 0.5,
                percentage: 10.0,
                silent: true,
                mask: OperationMask::single(Op::Write),
            });
        }
        "delay_fault" if plan.delay.is_none() => {
            plan.delay = Some(DelayFault {
                probability: 0.5,
                delay_ms: 500,
                mask: OperationMask::all(),
            });
        }
        "timing_fault" if plan.timing.is_none() => {
            plan.timing = Some(TimingFault {
                enabled: false,
                after_minutes: 5,
                mask: OperationMask::all(),
            });
        }
        "operation_count_fault" if plan.count.is_none() => {
            plan.count = Some(CountFault {
                enabled: false,
                every_n: 10,
                after_bytes: 1024 * 1024,
                mask: OperationMask::all(),
            });
        }
        "partial_fault" if plan.partial.is_none() => {
            plan.partial = Some(PartialFault {
                probability: 0.5,
                factor: 0.5,
                mask: OperationMask::single(Op::Read) | OperationMask::single(Op::Write),
            });
        }
        _ => {}
    }
}

fn apply_global_key(settings: &mut Settings, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "storage_path" => settings.storage_path = PathBuf::from(value),
        "mount_point" => settings.mount_point = PathBuf::from(value),
        "log_file" => settings.log_file = value.to_string(),
        "log_level" => settings.log_level = parse_numeric(value, "", key)?,
        "enable_fault_injection" => settings.enable_fault_injection = parse_bool(value),
        other => log::warn!("unknown global configuration key: {other:?}"),
    }
    Ok(())
}

fn apply_fault_key(plan: &mut FaultPlan, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
    match section {
        "error_fault" => {
            let Some(fault) = plan.error.as_mut() else { return Ok(()) };
            match key {
                "probability" => fault.probability = parse_unit_interval(value, section, key)?,
                "error_code" => fault.error_code = parse_numeric(value, section, key)?,
                "operations" => fault.mask = OperationMask::parse(value),
                other => log::warn!("unknown key {other:?} in [{section}]"),
            }
        }
        "corruption_fault" => {
            let Some(fault) = plan.corruption.as_mut() else { return Ok(()) };
            match key {
                "probability" => fault.probability = parse_unit_interval(value, section, key)?,
                "percentage" => fault.percentage = parse_percentage(value, section, key)?,
                "silent" => fault.silent = parse_bool(value),
                "operations" => fault.mask = OperationMask::parse(value),
                other => log::warn!("unknown key {other:?} in [{section}]"),
            }
        }
        "delay_fault" => {
            let Some(fault) = plan.delay.as_mut() else { return Ok(()) };
            match key {
                "probability" => fault.probability = parse_unit_interval(value, section, key)?,
                "delay_ms" => fault.delay_ms = parse_numeric(value, section, key)?,
                "operations" => fault.mask = OperationMask::parse(value),
                other => log::warn!("unknown key {other:?} in [{section}]"),
            }
        }
        "timing_fault" => {
            let Some(fault) = plan.timing.as_mut() else { return Ok(()) };
            match key {
                "enabled" => fault.enabled = parse_bool(value),
                "after_minutes" => fault.after_minutes = parse_numeric(value, section, key)?,
                "operations" => fault.mask = OperationMask::parse(value),
                other => log::warn!("unknown key {other:?} in [{section}]"),
            }
        }
        "operation_count_fault" => {
            let Some(fault) = plan.count.as_mut() else { return Ok(()) };
            match key {
                "enabled" => fault.enabled = parse_bool(value),
                "every_n_operations" => fault.every_n = parse_numeric(value, section, key)?,
                "after_bytes" => fault.after_bytes = parse_numeric(value, section, key)?,
                "operations" => fault.mask = OperationMask::parse(value),
                other => log::warn!("unknown key {other:?} in [{section}]"),
            }
        }
        "partial_fault" => {
            let Some(fault) = plan.partial.as_mut() else { return Ok(()) };
            match key {
                "probability" => fault.probability = parse_unit_interval(value, section, key)?,
                "factor" => fault.factor = parse_unit_interval(value, section, key)?,
                "operations" => fault.mask = OperationMask::parse(value),
                other => log::warn!("unknown key {other:?} in [{section}]"),
            }
        }
        other => log::warn!("unknown configuration section: {other:?}"),
    }
    Ok(())
}

fn parse_bool(value: &str) -> bool {
    value == "true" || value == "1"
}

fn parse_float(value: &str, section: &str, key: &str) -> Result<f32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parses a probability or factor, rejecting anything outside `[0, 1]`.
fn parse_unit_interval(value: &str, section: &str, key: &str) -> Result<f32, ConfigError> {
    let parsed = parse_float(value, section, key)?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

/// Parses a corruption percentage, rejecting anything outside `[0, 100]`.
fn parse_percentage(value: &str, section: &str, key: &str) -> Result<f32, ConfigError> {
    let parsed = parse_float(value, section, key)?;
    if !(0.0..=100.0).contains(&parsed) {
        return Err(ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_numeric<T: std::str::FromStr>(value: &str, section: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_populate_on_first_section_header() {
        let file = write_config("[error_fault]\n");
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        load_ini(file.path(), &mut settings, &mut plan).unwrap();
        let fault = plan.error.unwrap();
        assert_eq!(fault.probability, 0.5);
        assert_eq!(fault.error_code, -libc::EIO);
        assert_eq!(fault.mask, OperationMask::all());
    }

    #[test]
    fn explicit_keys_override_defaults() {
        let file = write_config(
            "[error_fault]\nprobability = 1.0\nerror_code = -5 # flaky disk\noperations = read,write\n",
        );
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        load_ini(file.path(), &mut settings, &mut plan).unwrap();
        let fault = plan.error.unwrap();
        assert_eq!(fault.probability, 1.0);
        assert_eq!(fault.error_code, -5);
        assert!(fault.mask.affects(Op::Read));
        assert!(fault.mask.affects(Op::Write));
        assert!(!fault.mask.affects(Op::Getattr));
    }

    #[test]
    fn global_section_parses_before_any_header() {
        let file = write_config("storage_path = /tmp/storage\nenable_fault_injection = true\n");
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        load_ini(file.path(), &mut settings, &mut plan).unwrap();
        assert_eq!(settings.storage_path, PathBuf::from("/tmp/storage"));
        assert!(settings.enable_fault_injection);
    }

    #[test]
    fn invalid_numeric_value_fails_load() {
        let file = write_config("[delay_fault]\ndelay_ms = not_a_number\n");
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        let err = load_ini(file.path(), &mut settings, &mut plan).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn out_of_range_probability_fails_load() {
        let file = write_config("[error_fault]\nprobability = 2.0\n");
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        let err = load_ini(file.path(), &mut settings, &mut plan).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn out_of_range_percentage_fails_load() {
        let file = write_config("[corruption_fault]\npercentage = 150\n");
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        let err = load_ini(file.path(), &mut settings, &mut plan).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn out_of_range_factor_fails_load() {
        let file = write_config("[partial_fault]\nfactor = 1.5\n");
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        let err = load_ini(file.path(), &mut settings, &mut plan).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn boundary_probability_values_succeed() {
        let file = write_config("[delay_fault]\nprobability = 0\n");
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        load_ini(file.path(), &mut settings, &mut plan).unwrap();
        assert_eq!(plan.delay.unwrap().probability, 0.0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut settings = Settings::default();
        let mut plan = FaultPlan::default();
        let err = load_ini(Path::new("/nonexistent/path.ini"), &mut settings, &mut plan).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
