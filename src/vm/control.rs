/// One structured-control-flow scope: a `block`, `loop`, `if` arm or
/// the function body itself.
///
/// All code positions are offsets into the owning function's code and
/// all stack positions are offsets from the frame's stack bottoms, so
/// records serialize into the migration image without translation.
/// `target` is the position of the `end` opcode for block/if/function
/// scopes and the loop head for loops, which is what gives `br` its
/// exit-vs-repeat semantics. The scope kind itself is not recorded:
/// no handler needs it at run time and the image format does not
/// carry it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    /// Offset of the first opcode of the scope body.
    pub begin: usize,
    /// Branch target: `end` opcode offset, or loop head.
    pub target: usize,
    /// Saved value-stack watermark, relative to `sp_bottom`.
    pub frame_sp: usize,
    /// Saved type-tag-stack watermark, relative to `tsp_bottom`.
    pub frame_tsp: usize,
    /// Branch arity in cells.
    pub cell_num: u32,
    /// Branch arity in logical values.
    pub count: u32,
}

/// Cells charged per control record against the frame arena budget.
pub(crate) const CTRL_BLOCK_CELLS: u32 = (core::mem::size_of::<ControlBlock>() / 4) as u32;
