//! Service configuration
//!
//! Defaults, then an optional TOML file, then environment overrides.
//! The resulting `JudgeConfig` is passed by value to the components that
//! need it; there is no global configuration state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "./files/judge.toml";

/// Limits applied when a submission does not specify its own
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitDefaults {
    pub time_limit_ms: u32,
    pub memory_limit_mb: u32,
    pub output_limit_kb: u32,
}

impl Default for LimitDefaults {
    fn default() -> Self {
        Self {
            time_limit_ms: 2000,
            memory_limit_mb: 256,
            output_limit_kb: 64 * 1024,
        }
    }
}

/// Per-language overrides from `[languages.<tag>]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageOverride {
    /// Compiler binary (gcc, g++, javac)
    pub compiler: Option<String>,
    /// Runtime binary (java, python3)
    pub runtime: Option<String>,
    /// (multiplier, bonus_seconds): base_time * multiplier + bonus
    pub time_limit: Option<(u32, u32)>,
    /// (multiplier, bonus_mb): base_memory * multiplier + bonus
    pub memory_limit: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Parent directory of all per-submission workspaces
    pub workspace_root: PathBuf,
    /// Worker pool size (max concurrently judged submissions)
    pub workers: usize,
    /// Compile time limit in milliseconds (default: 30000ms = 30s)
    pub compile_time_limit_ms: u32,
    /// Compile memory limit in MB (default: 2048MB)
    pub compile_memory_limit_mb: u32,
    pub compile_output_limit_kb: u32,
    /// Cap on captured stderr; overflow is truncated silently
    pub stderr_limit_kb: u32,
    /// Cap on stdout/stderr/diagnostic excerpts in delivered reports
    pub excerpt_limit_kb: u32,
    /// RLIMIT_FSIZE for every spawned process
    pub file_size_limit_kb: u32,
    pub memory_poll_interval_ms: u64,
    /// Age after which retained workspaces are deleted at start-up
    pub retained_max_age_secs: u64,
    pub defaults: LimitDefaults,
    pub languages: HashMap<String, LanguageOverride>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("oj-compiler").join("workspaces"),
            workers: 4,
            compile_time_limit_ms: 30_000,
            compile_memory_limit_mb: 2048,
            compile_output_limit_kb: 1024,
            stderr_limit_kb: 64,
            excerpt_limit_kb: 4,
            file_size_limit_kb: 256 * 1024,
            memory_poll_interval_ms: 10,
            retained_max_age_secs: 24 * 60 * 60,
            defaults: LimitDefaults::default(),
            languages: HashMap::new(),
        }
    }
}

impl JudgeConfig {
    /// Load configuration from `$JUDGE_CONFIG` (or the default path, if
    /// present) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("JUDGE_CONFIG").ok();
        let path = explicit
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if explicit.is_some() || Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            info!("Loaded judge configuration from {}", path);
            Self::from_toml_str(&content)
                .with_context(|| format!("Invalid config file {}", path))?
        } else {
            debug!("No config file at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: JudgeConfig = toml::from_str(content)?;
        // Tags are case-insensitive
        config.languages = config
            .languages
            .into_iter()
            .map(|(tag, value)| (tag.to_lowercase(), value))
            .collect();
        Ok(config)
    }

    /// Apply `WORKSPACE_ROOT`, `JUDGE_WORKERS` and `COMPILE_TIME_LIMIT_MS`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup("WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(workers) = lookup("JUDGE_WORKERS") {
            self.workers = workers
                .parse()
                .with_context(|| format!("Invalid JUDGE_WORKERS: {}", workers))?;
        }
        if let Some(limit) = lookup("COMPILE_TIME_LIMIT_MS") {
            self.compile_time_limit_ms = limit
                .parse()
                .with_context(|| format!("Invalid COMPILE_TIME_LIMIT_MS: {}", limit))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.memory_poll_interval_ms == 0 {
            anyhow::bail!("memory_poll_interval_ms must be non-zero");
        }
        let limits = [
            ("compile_time_limit_ms", self.compile_time_limit_ms),
            ("compile_memory_limit_mb", self.compile_memory_limit_mb),
            ("compile_output_limit_kb", self.compile_output_limit_kb),
            ("stderr_limit_kb", self.stderr_limit_kb),
            ("excerpt_limit_kb", self.excerpt_limit_kb),
            ("file_size_limit_kb", self.file_size_limit_kb),
            ("defaults.time_limit_ms", self.defaults.time_limit_ms),
            ("defaults.memory_limit_mb", self.defaults.memory_limit_mb),
            ("defaults.output_limit_kb", self.defaults.output_limit_kb),
        ];
        for (name, value) in limits {
            if value == 0 {
                anyhow::bail!("{} must be non-zero", name);
            }
        }
        for (tag, lang) in &self.languages {
            for (kind, adjust) in [("time", lang.time_limit), ("memory", lang.memory_limit)] {
                if let Some((0, _)) = adjust {
                    anyhow::bail!("Invalid {} multiplier for {}: 0", kind, tag);
                }
            }
        }
        Ok(())
    }

    pub fn language(&self, tag: &str) -> Option<&LanguageOverride> {
        self.languages.get(tag)
    }

    pub fn excerpt_limit_bytes(&self) -> usize {
        self.excerpt_limit_kb as usize * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let config = JudgeConfig::from_toml_str(
            r#"
workers = 2
workspace_root = "/var/lib/oj/workspaces"

[defaults]
time_limit_ms = 1000

[languages.Java]
runtime = "/usr/lib/jvm/bin/java"
time_limit = [2, 1]
memory_limit = [1, 64]
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.defaults.time_limit_ms, 1000);
        // untouched keys keep their defaults
        assert_eq!(config.defaults.memory_limit_mb, 256);
        let java = config.language("java").unwrap();
        assert_eq!(java.time_limit, Some((2, 1)));
        assert_eq!(java.runtime.as_deref(), Some("/usr/lib/jvm/bin/java"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = JudgeConfig::default();
        config
            .apply_overrides(|key| match key {
                "JUDGE_WORKERS" => Some("8".into()),
                "WORKSPACE_ROOT" => Some("/srv/ws".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.workspace_root, PathBuf::from("/srv/ws"));

        let bad = config.apply_overrides(|key| (key == "JUDGE_WORKERS").then(|| "many".into()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = JudgeConfig {
            workers: 0,
            ..JudgeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(JudgeConfig::default().validate().is_ok());
    }
}
