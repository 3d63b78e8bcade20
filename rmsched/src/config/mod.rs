//! Daemon configuration loading.
//!
//! The expected YAML structure is (every key optional):
//! ```yaml
//! scheduler:
//!   admission: fixed          # fixed | liu_layland
//!   utilization_bound: 693    # permille, used by `fixed`
//!   max_tasks: 64
//!   rt_priority: 99
//! control:
//!   listen: "127.0.0.1:7878"
//! ```

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::scheduler::admission::{AdmissionPolicy, FIXED_BOUND_PERMILLE};

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_MAX_TASKS: usize = 64;

/// `MAX_USER_RT_PRIO - 1`: the highest level a SCHED_FIFO thread can hold.
pub const DEFAULT_RT_PRIORITY: i32 = 99;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7878";

fn default_bound() -> u64 {
    FIXED_BOUND_PERMILLE
}

fn default_max_tasks() -> usize {
    DEFAULT_MAX_TASKS
}

fn default_rt_priority() -> i32 {
    DEFAULT_RT_PRIORITY
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    scheduler: SchedulerSection,
    #[serde(default)]
    control: ControlSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AdmissionKind {
    #[default]
    Fixed,
    LiuLayland,
}

#[derive(Debug, Deserialize)]
struct SchedulerSection {
    #[serde(default)]
    admission: AdmissionKind,
    #[serde(default = "default_bound")]
    utilization_bound: u64,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
    #[serde(default = "default_rt_priority")]
    rt_priority: i32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            admission: AdmissionKind::default(),
            utilization_bound: default_bound(),
            max_tasks: default_max_tasks(),
            rt_priority: default_rt_priority(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ControlSection {
    #[serde(default = "default_listen")]
    listen: String,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

// ── Public data structures ────────────────────────────────────────────────────

/// Parameters of the scheduler core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub admission: AdmissionPolicy,
    /// Capacity of the task record arena.
    pub max_tasks: usize,
    /// SCHED_FIFO level given to the running task.
    pub rt_priority: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionPolicy::default(),
            max_tasks: DEFAULT_MAX_TASKS,
            rt_priority: DEFAULT_RT_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlConfig {
    /// TCP address the control surface listens on.
    pub listen: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

/// Full daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonConfig {
    pub scheduler: SchedulerConfig,
    pub control: ControlConfig,
}

impl DaemonConfig {
    /// Parse and validate `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is structurally
    /// invalid, or a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading scheduler configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let cfg = Self::from_file(file)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        debug!(?cfg, "configuration loaded");
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let s = file.scheduler;

        ensure!(
            (1..=1000).contains(&s.utilization_bound),
            "utilization_bound must be within 1..=1000 permille, got {}",
            s.utilization_bound
        );
        ensure!(s.max_tasks > 0, "max_tasks must be positive");
        ensure!(
            (1..=99).contains(&s.rt_priority),
            "rt_priority must be within 1..=99, got {}",
            s.rt_priority
        );
        ensure!(!file.control.listen.is_empty(), "control.listen is empty");

        let admission = match s.admission {
            AdmissionKind::Fixed => AdmissionPolicy::Fixed {
                bound_permille: s.utilization_bound,
            },
            AdmissionKind::LiuLayland => AdmissionPolicy::LiuLayland,
        };

        Ok(Self {
            scheduler: SchedulerConfig {
                admission,
                max_tasks: s.max_tasks,
                rt_priority: s.rt_priority,
            },
            control: ControlConfig {
                listen: file.control.listen,
            },
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn full_file_is_parsed() {
        let yaml = r#"
scheduler:
  admission: fixed
  utilization_bound: 700
  max_tasks: 8
  rt_priority: 80
control:
  listen: "0.0.0.0:9000"
"#;
        let f = yaml_tempfile(yaml);
        let cfg = DaemonConfig::load_from_file(f.path()).unwrap();
        assert_eq!(
            cfg.scheduler.admission,
            AdmissionPolicy::Fixed {
                bound_permille: 700
            }
        );
        assert_eq!(cfg.scheduler.max_tasks, 8);
        assert_eq!(cfg.scheduler.rt_priority, 80);
        assert_eq!(cfg.control.listen, "0.0.0.0:9000");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let f = yaml_tempfile("scheduler:\n  admission: liu_layland\n");
        let cfg = DaemonConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg.scheduler.admission, AdmissionPolicy::LiuLayland);
        assert_eq!(cfg.scheduler.max_tasks, DEFAULT_MAX_TASKS);
        assert_eq!(cfg.scheduler.rt_priority, DEFAULT_RT_PRIORITY);
        assert_eq!(cfg.control.listen, DEFAULT_LISTEN);
    }

    #[test]
    fn default_matches_fixed_693() {
        let cfg = DaemonConfig::default();
        assert_eq!(
            cfg.scheduler.admission,
            AdmissionPolicy::Fixed {
                bound_permille: 693
            }
        );
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        let f = yaml_tempfile("scheduler:\n  rt_priority: 150\n");
        let err = DaemonConfig::load_from_file(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("rt_priority"), "{err:#}");
    }

    #[test]
    fn unknown_admission_kind_is_a_parse_error() {
        let f = yaml_tempfile("scheduler:\n  admission: earliest_deadline\n");
        assert!(DaemonConfig::load_from_file(f.path()).is_err());
    }

    #[test]
    fn missing_file_returns_error() {
        let result = DaemonConfig::load_from_file(Path::new("/nonexistent/path/rmsched.yaml"));
        assert!(result.is_err());
    }
}
