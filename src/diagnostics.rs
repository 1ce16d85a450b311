//! Free-memory probe for the `heap` diagnostic field.

use std::fs;
use std::path::PathBuf;

/// Reads `MemAvailable` from a meminfo file.
#[derive(Clone, Debug)]
pub struct MemoryProbe {
    path: PathBuf,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Available memory in bytes, 0 if it cannot be determined
    pub fn free_bytes(&self) -> u64 {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|contents| parse_mem_available(&contents))
            .unwrap_or(0)
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// `MemAvailable:  123456 kB` → bytes
pub fn parse_mem_available(contents: &str) -> Option<u64> {
    let line = contents.lines().find(|line| line.starts_with("MemAvailable:"))?;
    let kib = line
        .trim_start_matches("MemAvailable:")
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()?;
    Some(kib * 1024)
}
