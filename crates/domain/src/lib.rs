//! Block-sparse grids: active-block discovery, bit masks, neighbor tables,
//! partition index spaces, multi-resolution levels, fields and reductions.
//!
//! # Invariants
//! - A block gets an id iff it holds at least one active voxel; ids follow
//!   z-outer, x-fastest enumeration of the block lattice.
//! - A voxel's mask bit is set iff the activity predicate accepted it, and the
//!   same addressing function writes and reads the bit.
//! - Neighbor tables are symmetric: if `b` is in slot `s` of `a`, then `a` is
//!   in the opposite slot of `b`.
//! - For every device, INTERNAL and BOUNDARY partition STANDARD.
//! - On a multi-resolution grid every active child has an active parent.

pub mod cell;
pub mod descriptor;
pub mod field;
pub mod grid;
pub mod index;
pub mod mirror;
pub mod multires;
pub mod partition;
pub mod reduce;
pub mod stencil;

pub use cell::{Cell, MaskLocation, NEIGHBOR_SLOTS, NO_NEIGHBOR};
pub use descriptor::{GridDescriptor, MultiResDescriptor};
pub use field::{BlockField, FieldPartition, FieldPartitionMut};
pub use grid::BlockGrid;
pub use index::BlockIndex;
pub use mirror::MirroredTable;
pub use multires::{MultiResField, MultiResGrid, MultiResLevel, MultiResPartition, MultiResPartitionMut};
pub use partition::PartitionIndexSpace;
pub use reduce::{BlasEngine, PatternScalar, Scalar, SequentialBlas};
pub use stencil::{NghIdx, Stencil};

pub fn crate_info() -> &'static str {
    "blockspace-domain v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("domain"));
    }
}
