mod error;
mod host_error;
mod instance;
mod module;
mod untyped_value;
mod value;

/// This constant is driven by the WebAssembly standard, default
/// memory page size is 64kB.
pub const N_BYTES_PER_MEMORY_PAGE: u32 = 65536;

/// We have a hard limit for max possible memory used
/// that is equal to ~64mB.
pub const N_MAX_MEMORY_PAGES: u32 = 1024;

/// Granularity of the dirty-page snapshot encoding. Unrelated to the
/// 64 KiB WebAssembly memory page.
pub const N_BYTES_PER_IMAGE_PAGE: u32 = 4096;

pub const N_MAX_TABLE_SIZE: usize = 1024;
pub const N_MAX_DATA_SEGMENTS: usize = 1024;
pub const N_MAX_ELEMENT_SEGMENTS: usize = 1024;

/// Default size of the per-executor wasm stack arena, in 32-bit cells.
pub const N_DEFAULT_WASM_STACK_CELLS: usize = 64 * 1024;

/// Sentinel stored in tables for an uninitialized element.
pub const NULL_REF: u32 = u32::MAX;

pub use error::*;
pub use host_error::*;
pub use instance::*;
pub use module::*;
pub use untyped_value::*;
pub use value::*;
