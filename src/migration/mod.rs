mod checkpoint;
mod context;
mod image;
mod restore;

pub use checkpoint::*;
pub use context::*;
pub use image::*;
pub use restore::*;
