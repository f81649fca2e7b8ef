use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::IVec3;

use blockspace_common::{DataView, FieldUid, Result};
use blockspace_set::{BoundaryExchange, Loadable};

use crate::cell::{Cell, block_volume, local_linear};
use crate::grid::BlockGrid;

/// Position of component `c` of `cell` in array-of-structs storage.
pub(crate) fn storage_offset(cell: Cell, component: usize, block_size: i32, cardinality: usize) -> usize {
    (cell.block as usize * block_volume(block_size) + local_linear(cell.local, block_size))
        * cardinality
        + component
}

struct FieldInner<T> {
    uid: FieldUid,
    name: String,
    cardinality: usize,
    inactive: T,
    grid: BlockGrid,
    data: RwLock<Vec<T>>,
    exchanges: AtomicU64,
}

impl<T> FieldInner<T> {
    fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-voxel storage over the active blocks of a [`BlockGrid`].
///
/// Every slot of every stored block is allocated, including inactive voxels
/// inside active blocks; slots start at the inactive value.
pub struct BlockField<T> {
    inner: Arc<FieldInner<T>>,
}

impl<T> Clone for BlockField<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BlockField<T>
where
    T: Copy + Send + Sync + 'static,
{
    pub(crate) fn with_uid(
        grid: &BlockGrid,
        uid: FieldUid,
        name: impl Into<String>,
        cardinality: usize,
        inactive: T,
    ) -> Self {
        let len = grid.num_blocks() * block_volume(grid.block_size()) * cardinality;
        let name = name.into();
        tracing::debug!(field = %name, cardinality, slots = len, "field allocated");
        Self {
            inner: Arc::new(FieldInner {
                uid,
                name,
                cardinality,
                inactive,
                grid: grid.clone(),
                data: RwLock::new(vec![inactive; len]),
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    pub fn cardinality(&self) -> usize {
        self.inner.cardinality
    }

    pub fn grid(&self) -> &BlockGrid {
        &self.inner.grid
    }

    pub fn inactive_value(&self) -> T {
        self.inner.inactive
    }

    /// Value at a global voxel, or the inactive value outside the active set.
    pub fn get(&self, global: IVec3, component: usize) -> T {
        debug_assert!(component < self.inner.cardinality);
        match self.inner.grid.cell_at(global) {
            Some(cell) => self.inner.read()[self.offset(cell, component)],
            None => self.inner.inactive,
        }
    }

    /// Store a value at an active voxel. Returns `false` for inactive voxels.
    pub fn set(&self, global: IVec3, component: usize, value: T) -> bool {
        debug_assert!(component < self.inner.cardinality);
        let Some(cell) = self.inner.grid.cell_at(global) else {
            return false;
        };
        let offset = self.offset(cell, component);
        self.inner.write()[offset] = value;
        true
    }

    /// Host-side loop over every active voxel and component, in partition order.
    pub fn for_each_active_cell<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(IVec3, usize, &mut T),
    {
        let grid = &self.inner.grid;
        let space = grid.partition_space(0, DataView::Standard)?;
        let mut data = self.inner.write();
        for cell in space.cells() {
            let Some(global) = grid.global_index(cell) else {
                continue;
            };
            for c in 0..self.inner.cardinality {
                f(global, c, &mut data[self.offset(cell, c)]);
            }
        }
        Ok(())
    }

    pub fn fill(&self, value: T) -> Result<()> {
        self.for_each_active_cell(|_, _, v| *v = value)
    }

    /// Number of boundary exchanges run on this field.
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    /// Run `f` over the raw storage while holding a read lock.
    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.read())
    }

    fn offset(&self, cell: Cell, component: usize) -> usize {
        storage_offset(
            cell,
            component,
            self.inner.grid.block_size(),
            self.inner.cardinality,
        )
    }
}

impl BlockGrid {
    /// Allocate a field over this grid's active blocks.
    pub fn new_field<T>(&self, name: impl Into<String>, cardinality: usize, inactive: T) -> BlockField<T>
    where
        T: Copy + Send + Sync + 'static,
    {
        BlockField::with_uid(self, FieldUid::new(), name, cardinality, inactive)
    }
}

impl<T> Loadable for BlockField<T>
where
    T: Copy + Send + Sync + 'static,
{
    type Partition = FieldPartition<T>;
    type PartitionMut = FieldPartitionMut<T>;

    fn uid(&self) -> FieldUid {
        self.inner.uid
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn partition(&self) -> FieldPartition<T> {
        FieldPartition {
            field: Arc::clone(&self.inner),
        }
    }

    fn partition_mut(&self) -> FieldPartitionMut<T> {
        FieldPartitionMut {
            view: self.partition(),
        }
    }

    fn boundary_exchange(&self) -> Option<Arc<dyn BoundaryExchange>> {
        Some(Arc::new(HaloExchange {
            field: Arc::clone(&self.inner),
        }))
    }
}

/// Read handle a kernel receives from `Loader::load`.
pub struct FieldPartition<T> {
    field: Arc<FieldInner<T>>,
}

impl<T> Clone for FieldPartition<T> {
    fn clone(&self) -> Self {
        Self {
            field: Arc::clone(&self.field),
        }
    }
}

impl<T: Copy> FieldPartition<T> {
    pub fn cardinality(&self) -> usize {
        self.field.cardinality
    }

    pub fn read(&self, cell: Cell, component: usize) -> T {
        self.field.read()[self.offset(cell, component)]
    }

    /// Value at `offset` from `cell`, or `None` when that voxel is inactive.
    pub fn neighbor(&self, cell: Cell, offset: IVec3, component: usize) -> Option<T> {
        let target = self.field.grid.neighbor_cell(cell, offset)?;
        Some(self.read(target, component))
    }

    /// Value at the `point`-th stencil offset, or the inactive value.
    pub fn stencil(&self, cell: Cell, point: usize, component: usize) -> T {
        match self.field.grid.stencil_neighbor(cell, point) {
            Some(target) => self.read(target, component),
            None => self.field.inactive,
        }
    }

    pub fn global_index(&self, cell: Cell) -> Option<IVec3> {
        self.field.grid.global_index(cell)
    }

    /// Panics when `component` is not below the field's cardinality.
    fn offset(&self, cell: Cell, component: usize) -> usize {
        assert!(
            component < self.field.cardinality,
            "component {component} out of range for `{}` with {} components",
            self.field.name,
            self.field.cardinality
        );
        storage_offset(
            cell,
            component,
            self.field.grid.block_size(),
            self.field.cardinality,
        )
    }
}

/// Read-write handle a kernel receives from `Loader::load_mut`.
pub struct FieldPartitionMut<T> {
    view: FieldPartition<T>,
}

impl<T> Clone for FieldPartitionMut<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
        }
    }
}

impl<T: Copy> FieldPartitionMut<T> {
    pub fn write(&self, cell: Cell, component: usize, value: T) {
        let offset = self.view.offset(cell, component);
        self.view.field.write()[offset] = value;
    }

    /// Read-modify-write of one slot under the storage lock.
    pub fn update(&self, cell: Cell, component: usize, f: impl FnOnce(T) -> T) {
        let offset = self.view.offset(cell, component);
        let mut data = self.view.field.write();
        data[offset] = f(data[offset]);
    }
}

impl<T> Deref for FieldPartitionMut<T> {
    type Target = FieldPartition<T>;

    fn deref(&self) -> &FieldPartition<T> {
        &self.view
    }
}

/// Halo transfer for a field on a single-device grid. Every neighbor block
/// is device-local, so there is nothing to copy; the exchange only records
/// that it ran.
struct HaloExchange<T> {
    field: Arc<FieldInner<T>>,
}

impl<T: Send + Sync> BoundaryExchange for HaloExchange<T> {
    fn exchange(&self, stream: usize) -> Result<()> {
        self.field.exchanges.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(field = %self.field.name, stream, "halo exchange");
        Ok(())
    }
}
