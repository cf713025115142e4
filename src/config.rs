use serde::Deserialize;

use crate::mem::policy::PolicyKind;
use crate::sched::policy::Algorithm;

const DEFAULT_MAIN_TOTAL: usize = 4096;
const DEFAULT_PAGE_SIZE: usize = 256;
const DEFAULT_SECONDARY_TOTAL: usize = 16384;
const DEFAULT_BLOCK_SIZE: usize = 256;
const DEFAULT_CACHE_LINES: usize = 8;
const DEFAULT_LINE_SIZE: usize = 16;

const DEFAULT_CACHE_WEIGHT: u64 = 1;
const DEFAULT_PRIMARY_WEIGHT: u64 = 5;
const DEFAULT_SECONDARY_WEIGHT: u64 = 10;

/// Top-level simulator configuration.
///
/// Loaded from a TOML file with sections for main memory, secondary memory,
/// cache, CPU and scheduling. Every field has a default so a partial (or
/// empty) file yields a runnable configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub main_memory: MainMemoryConfig,
    #[serde(default)]
    pub secondary_memory: SecondaryMemoryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

impl SystemConfig {
    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error string if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config '{}': {}", path, e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config '{}': {}", path, e))
    }
}

/// Paged main memory parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MainMemoryConfig {
    /// Total capacity in bytes.
    #[serde(default = "default_main_total")]
    pub total: usize,

    /// Page (and frame) size in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Frame replacement policy: 0 = FIFO, 1 = LRU.
    #[serde(default)]
    pub policy: u8,

    /// Cycle cost charged per physical access.
    #[serde(default = "default_primary_weight")]
    pub weight: u64,
}

impl MainMemoryConfig {
    pub fn policy_kind(&self) -> PolicyKind {
        PolicyKind::from_code(self.policy)
    }
}

impl Default for MainMemoryConfig {
    fn default() -> Self {
        Self {
            total: DEFAULT_MAIN_TOTAL,
            page_size: DEFAULT_PAGE_SIZE,
            policy: 0,
            weight: DEFAULT_PRIMARY_WEIGHT,
        }
    }
}

/// Swap-backed secondary store parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryMemoryConfig {
    /// Total capacity in bytes.
    #[serde(default = "default_secondary_total")]
    pub total: usize,

    /// Transfer block size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Cycle cost charged per access.
    #[serde(default = "default_secondary_weight")]
    pub weight: u64,
}

impl Default for SecondaryMemoryConfig {
    fn default() -> Self {
        Self {
            total: DEFAULT_SECONDARY_TOTAL,
            block_size: DEFAULT_BLOCK_SIZE,
            weight: DEFAULT_SECONDARY_WEIGHT,
        }
    }
}

/// L1 cache parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Number of cache lines.
    #[serde(default = "default_cache_lines")]
    pub size: usize,

    /// Line size in bytes. Words per line is `line_size / 4`.
    #[serde(default = "default_line_size")]
    pub line_size: usize,

    /// Replacement policy: 0 = FIFO, 1 = LRU.
    #[serde(default)]
    pub policy: u8,

    /// Cycle cost charged per cache access.
    #[serde(default = "default_cache_weight")]
    pub weight: u64,
}

impl CacheConfig {
    pub fn policy_kind(&self) -> PolicyKind {
        PolicyKind::from_code(self.policy)
    }

    pub fn words_per_line(&self) -> usize {
        (self.line_size / 4).max(1)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CACHE_LINES,
            line_size: DEFAULT_LINE_SIZE,
            policy: 0,
            weight: DEFAULT_CACHE_WEIGHT,
        }
    }
}

/// CPU parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CpuConfig {
    /// Number of simulated cores.
    #[serde(default = "default_cores")]
    pub cores: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            cores: default_cores(),
        }
    }
}

/// Scheduling parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// Selection policy: 0 = Round-Robin, 1 = SJF, 2 = Lottery,
    /// 3 = Priority, 4 = FCFS. Unknown values fall back to FCFS.
    #[serde(default)]
    pub algorithm: u8,
}

impl SchedulingConfig {
    pub fn algorithm_kind(&self) -> Algorithm {
        Algorithm::from_code(self.algorithm)
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self { algorithm: 0 }
    }
}

fn default_main_total() -> usize {
    DEFAULT_MAIN_TOTAL
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_secondary_total() -> usize {
    DEFAULT_SECONDARY_TOTAL
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_cache_lines() -> usize {
    DEFAULT_CACHE_LINES
}

fn default_line_size() -> usize {
    DEFAULT_LINE_SIZE
}

fn default_cache_weight() -> u64 {
    DEFAULT_CACHE_WEIGHT
}

fn default_primary_weight() -> u64 {
    DEFAULT_PRIMARY_WEIGHT
}

fn default_secondary_weight() -> u64 {
    DEFAULT_SECONDARY_WEIGHT
}

fn default_cores() -> usize {
    1
}
