use std::sync::Arc;

use glam::IVec3;

use blockspace_common::{DataView, DeviceType};

use crate::cell::{Cell, block_volume, local_from_linear, mask_bit};

/// The set of cells a kernel visits for one device and one data view.
///
/// A view over the grid's shared tables: the block list of the view, plus
/// references to the active mask and block origins.
#[derive(Debug, Clone)]
pub struct PartitionIndexSpace {
    device: usize,
    data_view: DataView,
    domain_size: IVec3,
    block_size: i32,
    blocks: Arc<[u32]>,
    mask: Arc<[u32]>,
    device_mask: Option<Arc<[u32]>>,
    origins: Arc<[[i32; 3]]>,
}

impl PartitionIndexSpace {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: usize,
        data_view: DataView,
        domain_size: IVec3,
        block_size: i32,
        blocks: Vec<u32>,
        mask: Arc<[u32]>,
        device_mask: Option<Arc<[u32]>>,
        origins: Arc<[[i32; 3]]>,
    ) -> Self {
        Self {
            device,
            data_view,
            domain_size,
            block_size,
            blocks: blocks.into(),
            mask,
            device_mask,
            origins,
        }
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn data_view(&self) -> DataView {
        self.data_view
    }

    pub fn domain_size(&self) -> IVec3 {
        self.domain_size
    }

    pub fn block_size(&self) -> i32 {
        self.block_size
    }

    /// Block ids in this view, ascending.
    pub fn blocks(&self) -> &[u32] {
        &self.blocks
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Mask table resident on `device_type`, if one exists there.
    pub fn mask(&self, device_type: DeviceType) -> Option<&[u32]> {
        match device_type {
            DeviceType::Cpu => Some(&self.mask),
            DeviceType::Accelerator => self.device_mask.as_deref(),
        }
    }

    pub fn is_active(&self, cell: Cell) -> bool {
        mask_bit(&self.mask, cell, self.block_size)
    }

    pub fn block_origin(&self, block: u32) -> Option<IVec3> {
        self.origins.get(block as usize).map(|o| IVec3::from_array(*o))
    }

    /// Active cells of the view: blocks ascending, then z, y, x inside a block.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        let bs = self.block_size;
        let volume = block_volume(bs);
        self.blocks.iter().flat_map(move |&block| {
            (0..volume).filter_map(move |linear| {
                let cell = Cell::new(block, local_from_linear(linear, bs));
                self.is_active(cell).then_some(cell)
            })
        })
    }

    pub fn num_active_cells(&self) -> usize {
        self.cells().count()
    }
}
