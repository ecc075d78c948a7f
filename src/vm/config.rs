use crate::types::N_DEFAULT_WASM_STACK_CELLS;
use std::path::PathBuf;

/// Bounds of the auxiliary shadow stack inside linear memory.
/// `bottom` is the high address, `boundary` the low one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AuxStackBounds {
    pub bottom: u32,
    pub boundary: u32,
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// When disabled, linear memory accesses skip the explicit bounds
    /// check against the cached memory size (the final slice access
    /// still cannot corrupt memory).
    pub(crate) bounds_checks_enabled: bool,
    /// Arena budget for activation frames, in 32-bit cells.
    pub(crate) wasm_stack_cells: usize,
    pub(crate) aux_stack: Option<AuxStackBounds>,
    /// Directory the checkpoint image is written to and read from.
    pub(crate) image_dir: PathBuf,
    /// Install a SIGINT handler that requests a checkpoint.
    pub(crate) install_sigint: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            bounds_checks_enabled: true,
            wasm_stack_cells: N_DEFAULT_WASM_STACK_CELLS,
            aux_stack: None,
            image_dir: PathBuf::from("."),
            install_sigint: false,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds_checks(mut self, enabled: bool) -> Self {
        self.bounds_checks_enabled = enabled;
        self
    }

    pub fn with_wasm_stack_cells(mut self, cells: usize) -> Self {
        self.wasm_stack_cells = cells;
        self
    }

    pub fn with_aux_stack(mut self, bottom: u32, boundary: u32) -> Self {
        self.aux_stack = Some(AuxStackBounds { bottom, boundary });
        self
    }

    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = dir.into();
        self
    }

    pub fn with_sigint_checkpoint(mut self, enabled: bool) -> Self {
        self.install_sigint = enabled;
        self
    }
}
