use std::collections::HashSet;

/// Knobs for the optimization driver. `Default` gives the built-in values;
/// [`FoldConfig::from_env`] applies `FOLDRS_*` overrides on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldConfig {
    /// Worker threads of the CPU context [`ConstantFolder::from_config`] builds.
    ///
    /// [`ConstantFolder::from_config`]: crate::optimizer::ConstantFolder::from_config
    pub worker_threads: usize,
    /// Upper bound on constant-folding rounds per optimization run.
    pub max_iterations: usize,
    pub enabled: bool,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            max_iterations: 8,
            enabled: true,
        }
    }
}

impl FoldConfig {
    pub fn from_env() -> Self {
        Self {
            worker_threads: crate::env::fold_worker_threads(),
            max_iterations: crate::env::fold_max_iters(),
            enabled: crate::env::constant_folding_enabled(),
        }
    }
}

/// State shared by the passes of one optimization run.
#[derive(Debug, Default)]
pub struct OptimizeContext {
    failed_fold_keys: HashSet<u64>,
}

impl OptimizeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_failed_fold_key(&self, key: u64) -> bool {
        self.failed_fold_keys.contains(&key)
    }

    pub fn record_failed_fold_key(&mut self, key: u64) {
        self.failed_fold_keys.insert(key);
    }
}
