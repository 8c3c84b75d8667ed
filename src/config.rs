use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::Error;

pub const MAX_WORKERS: usize = 1024;
pub const MAX_BACKGROUND: usize = 16;
pub const MAX_SAMPLERS: usize = 8;
pub const MAX_SAMPLES: usize = 100_000;

/// Longest accepted sampler period.
pub const MAX_PERIOD: Duration = Duration::from_secs(60);

const MIN_STACK_SIZE: usize = 16 * 1024;
const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// Pseudo-random integer arithmetic
    Cpu,
    /// Bare increment loop
    Idle,
    /// Allocate/free churn over a fixed size table
    Alloc,
    /// Duplicate/close churn on a shared descriptor
    Dup,
}

impl WorkloadKind {
    pub fn name(&self) -> &'static str {
        match self {
            WorkloadKind::Cpu => "cpu",
            WorkloadKind::Idle => "idle",
            WorkloadKind::Alloc => "alloc",
            WorkloadKind::Dup => "dup",
        }
    }
}

/// When the orchestrator ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StopCondition {
    /// After the configured duration.
    Duration,
    /// Once every sampler has its full series, bounded by the duration.
    Samplers,
}

/// What to do with counts above the hard caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    Clamp,
    Refuse,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub workload: WorkloadKind,
    pub workers: usize,
    pub background: usize,
    #[serde(deserialize_with = "de_duration")]
    pub duration: Duration,
    pub stop: StopCondition,
    #[serde(deserialize_with = "de_durations")]
    pub periods: Vec<Duration>,
    pub samples: usize,
    pub stack_size: usize,
    pub worker_nice: i32,
    pub background_nice: i32,
    pub sampler_nice: i32,
    pub alloc_rounds: u32,
    pub dup_path: PathBuf,
    pub counter_frequency_hz: Option<u64>,
    pub limit_policy: LimitPolicy,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            workload: WorkloadKind::Idle,
            workers: 16,
            background: 0,
            duration: Duration::from_secs(5),
            stop: StopCondition::Duration,
            periods: Vec::new(),
            samples: 5000,
            stack_size: 64 * 1024,
            worker_nice: 0,
            background_nice: 5,
            sampler_nice: 0,
            alloc_rounds: 1000,
            dup_path: PathBuf::from("/dev/null"),
            counter_frequency_hz: None,
            limit_policy: LimitPolicy::Clamp,
        }
    }
}

impl BenchConfig {
    /// Checks counts against the hard caps and rejects settings that cannot
    /// produce a run. Over-cap counts are clamped or refused per `limit_policy`.
    pub fn validate(&mut self) -> Result<(), Error> {
        let policy = self.limit_policy;
        self.workers = apply_limit("worker count", self.workers, MAX_WORKERS, policy)?;
        self.background =
            apply_limit("background task count", self.background, MAX_BACKGROUND, policy)?;
        let samplers = apply_limit("sampler count", self.periods.len(), MAX_SAMPLERS, policy)?;
        self.periods.truncate(samplers);
        self.samples = apply_limit("sample cap", self.samples, MAX_SAMPLES, policy)?;

        self.stack_size = self.stack_size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);

        if self.duration.is_zero() {
            return Err(Error::InvalidConfig("duration must be > 0".into()));
        }
        if self.periods.iter().any(|p| p.is_zero()) {
            return Err(Error::InvalidConfig("sampler period must be > 0".into()));
        }
        if let Some(p) = self.periods.iter().find(|p| **p > MAX_PERIOD) {
            return Err(Error::InvalidConfig(format!(
                "sampler period {:?} exceeds the maximum of {:?}",
                p, MAX_PERIOD
            )));
        }
        if self.counter_frequency_hz == Some(0) {
            return Err(Error::InvalidConfig(
                "counter frequency must be > 0".into(),
            ));
        }
        if self.stop == StopCondition::Samplers && self.periods.is_empty() {
            return Err(Error::InvalidConfig(
                "stop = samplers needs at least one sampler period".into(),
            ));
        }
        if self.workers + self.background + self.periods.len() == 0 {
            return Err(Error::InvalidConfig("nothing to run".into()));
        }
        Ok(())
    }
}

fn apply_limit(what: &str, value: usize, max: usize, policy: LimitPolicy) -> Result<usize, Error> {
    if value <= max {
        return Ok(value);
    }
    match policy {
        LimitPolicy::Clamp => {
            log::warn!("{} limited to {} (requested {})", what, max, value);
            Ok(max)
        }
        LimitPolicy::Refuse => Err(Error::InvalidConfig(format!(
            "{} {} exceeds the maximum of {}",
            what, value, max
        ))),
    }
}

/// Parses `250us`, `10ms`, `5s`, `2m`; a bare number means seconds.
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit_nanos): (&str, u64) = if let Some(n) = s.strip_suffix("us") {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix("ms") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000_000_000)
    } else {
        (s, 1_000_000_000)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let nanos = u128::from(num) * u128::from(unit_nanos);
    let secs = u64::try_from(nanos / 1_000_000_000)
        .map_err(|_| Error::InvalidConfig(format!("duration out of range: {}", s)))?;
    Ok(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(d)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn de_durations<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Duration>, D::Error> {
    let v = Vec::<String>::deserialize(d)?;
    v.iter()
        .map(|s| parse_duration(s).map_err(serde::de::Error::custom))
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bench: BenchConfig,
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/schedbench.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidConfig(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new("/etc/schedbench.toml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidConfig(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidConfig(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    Ok(config)
}
