use std::sync::Arc;

use blockspace_common::{FieldUid, Result};

/// Transfer of neighbor-owned values into a field's halo.
///
/// Optional capability of a field type. Fields that have nothing to exchange
/// simply do not provide one, and stencil reads of them attach a no-op unit.
pub trait BoundaryExchange: Send + Sync {
    fn exchange(&self, stream: usize) -> Result<()>;
}

/// A field that Containers can declare accesses to.
///
/// The Loader hands out partitions only through this trait, so a kernel can
/// touch data only through handles it declared.
pub trait Loadable {
    /// Read-only per-cell view.
    type Partition: Send + Sync + 'static;
    /// Read-write per-cell view.
    type PartitionMut: Send + Sync + 'static;

    fn uid(&self) -> FieldUid;

    fn name(&self) -> &str;

    fn partition(&self) -> Self::Partition;

    fn partition_mut(&self) -> Self::PartitionMut;

    /// The boundary-exchange capability of this field type, if it has one.
    fn boundary_exchange(&self) -> Option<Arc<dyn BoundaryExchange>> {
        None
    }
}
