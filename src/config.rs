//! Cubefrag global configuration options.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options for the cubefrag crate.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with [`global_config_mut`].
///
/// # Configuration Options
///
/// ## Worker Group Size
/// > default: [`std::thread::available_parallelism`]`()`
///
/// The size of the outer worker group used to populate a datacube.
/// Each worker populates a deterministic sub-range of the fragment space on its own thread.
///
/// ## Threads Per Worker
/// > default: `4`
///
/// The concurrent limit of each worker's inner tier.
/// Each inner thread populates a deterministic sub-range of its worker's fragment range.
///
/// ## Compress Fragments
/// > default: [`false`]
///
/// If enabled, new datacubes compress fragment payloads before they reach the fragment store.
#[derive(Debug)]
pub struct Config {
    worker_group_size: u64,
    threads_per_worker: u64,
    compress_fragments: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_group_size: std::thread::available_parallelism()
                .map_or(1, |parallelism| parallelism.get() as u64),
            threads_per_worker: 4,
            compress_fragments: false,
        }
    }
}

impl Config {
    /// Get the [worker group size](#worker-group-size) configuration.
    #[must_use]
    pub fn worker_group_size(&self) -> u64 {
        self.worker_group_size
    }

    /// Set the [worker group size](#worker-group-size) configuration.
    ///
    /// A zero size is clamped to 1.
    pub fn set_worker_group_size(&mut self, worker_group_size: u64) {
        self.worker_group_size = std::cmp::max(1, worker_group_size);
    }

    /// Get the [threads per worker](#threads-per-worker) configuration.
    #[must_use]
    pub fn threads_per_worker(&self) -> u64 {
        self.threads_per_worker
    }

    /// Set the [threads per worker](#threads-per-worker) configuration.
    ///
    /// A zero size is clamped to 1.
    pub fn set_threads_per_worker(&mut self, threads_per_worker: u64) {
        self.threads_per_worker = std::cmp::max(1, threads_per_worker);
    }

    /// Get the [compress fragments](#compress-fragments) configuration.
    #[must_use]
    pub fn compress_fragments(&self) -> bool {
        self.compress_fragments
    }

    /// Set the [compress fragments](#compress-fragments) configuration.
    pub fn set_compress_fragments(&mut self, compress_fragments: bool) {
        self.compress_fragments = compress_fragments;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global cubefrag configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global cubefrag configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_compress_fragments() {
        assert!(!global_config().compress_fragments());
        global_config_mut().set_compress_fragments(true);
        assert!(global_config().compress_fragments());
        global_config_mut().set_compress_fragments(false);
    }

    #[test]
    fn config_tier_sizes_clamp_to_one() {
        let mut config = Config::default();
        config.set_worker_group_size(0);
        config.set_threads_per_worker(0);
        assert_eq!(config.worker_group_size(), 1);
        assert_eq!(config.threads_per_worker(), 1);
    }
}
