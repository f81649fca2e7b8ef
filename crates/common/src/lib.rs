//! Shared vocabulary for the blockspace substrate.
//!
//! # Invariants
//! - `DataView` has exactly three members; per-view tables are indexed by
//!   [`DataView::index`].
//! - Every error carries the name of the component that detected it.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Access, Compute, DataView, DeviceType, FieldUid, Index3d};

pub fn crate_info() -> &'static str {
    "blockspace-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
