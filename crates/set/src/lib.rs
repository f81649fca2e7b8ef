//! Execution layer: backends, Containers, and dependency capture.
//!
//! # Invariants
//! - Field accesses are declared through a [`Loader`] before any execution;
//!   the partitions it returns are the only handles a kernel holds.
//! - A field loaded for write under stencil compute is rejected at build time.
//! - Stencil reads carry a boundary-exchange unit that runs before boundary or
//!   multi-device execution; a field without the capability gets a `none` unit.
//! - `none` Containers are never dispatched.

pub mod backend;
pub mod container;
pub mod field;
pub mod kind;
pub mod loader;
pub mod sequence;
pub mod token;

pub use backend::{Backend, Stream};
pub use container::{Body, Container, Launch};
pub use field::{BoundaryExchange, Loadable};
pub use kind::ExecutionKind;
pub use loader::Loader;
pub use sequence::{Node, NodeRole, SchedulePolicy, Sequence};
pub use token::Token;

pub fn crate_info() -> &'static str {
    "blockspace-set v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("set"));
    }
}
