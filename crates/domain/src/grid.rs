use std::ops::Range;
use std::sync::Arc;

use glam::{DVec3, IVec3};

use blockspace_common::{DataView, DeviceType, Error, Result};
use blockspace_set::{Backend, Body, Container, ExecutionKind, Loader};

use crate::cell::{
    Cell, NEIGHBOR_SLOTS, NO_NEIGHBOR, block_volume, local_from_linear, mask_bit, mask_location,
    mask_words_per_block, neighbor_slot, slot_offset, wrap_local,
};
use crate::descriptor::{GridDescriptor, div_up};
use crate::index::BlockIndex;
use crate::mirror::MirroredTable;
use crate::partition::PartitionIndexSpace;
use crate::stencil::{NghIdx, Stencil};

struct GridData {
    backend: Backend,
    domain_size: IVec3,
    descriptor: GridDescriptor,
    stencil: Stencil,
    index: BlockIndex,
    /// Block id range owned by each device.
    device_blocks: Vec<Range<u32>>,
    active_voxels: Vec<u64>,
    mask: MirroredTable<u32>,
    origins: MirroredTable<[i32; 3]>,
    neighbors: MirroredTable<u32>,
    stencil_index: MirroredTable<NghIdx>,
    /// `[device][DataView::index()]`
    spaces: Vec<Vec<PartitionIndexSpace>>,
}

/// Block-sparse grid: the domain tiled into cubic blocks, with only blocks
/// that hold at least one active voxel stored.
///
/// All tables are built once in [`BlockGrid::new`] and immutable afterwards.
/// Cloning is cheap; clones share the tables.
#[derive(Clone)]
pub struct BlockGrid {
    data: Arc<GridData>,
}

impl BlockGrid {
    /// Discover active blocks, write masks, resolve neighbors and build the
    /// partition table.
    pub fn new<P>(
        backend: &Backend,
        domain_size: IVec3,
        active: P,
        stencil: &Stencil,
        descriptor: GridDescriptor,
    ) -> Result<Self>
    where
        P: Fn(IVec3) -> bool,
    {
        let bs = descriptor.block_size;
        let _span =
            tracing::info_span!("grid_build", domain = ?domain_size, block_size = bs).entered();

        if backend.device_count() > 1 {
            return Err(Error::configuration(
                "BlockGrid",
                format!(
                    "a grid is bound to a single device, backend has {}",
                    backend.device_count()
                ),
            ));
        }
        descriptor.validate()?;
        if domain_size.min_element() < 1 {
            return Err(Error::configuration(
                "BlockGrid",
                format!("domain size must be positive on every axis, got {domain_size}"),
            ));
        }
        if stencil.max_reach() > bs {
            return Err(Error::configuration(
                "BlockGrid",
                format!(
                    "stencil reaches {} voxels, more than the block size {bs}",
                    stencil.max_reach()
                ),
            ));
        }

        let volume = block_volume(bs);
        let words = mask_words_per_block(bs);
        let blocks_per_axis = IVec3::new(
            div_up(domain_size.x, bs),
            div_up(domain_size.y, bs),
            div_up(domain_size.z, bs),
        );

        let mut index = BlockIndex::new();
        let mut mask: Vec<u32> = Vec::new();
        let mut block_mask = vec![0u32; words];
        let mut hits = vec![false; volume];
        let mut active_voxels = 0u64;

        for bz in 0..blocks_per_axis.z {
            for by in 0..blocks_per_axis.y {
                for bx in 0..blocks_per_axis.x {
                    let origin = IVec3::new(bx, by, bz) * bs;
                    block_mask.fill(0);
                    let mut count = 0u64;
                    for (linear, hit) in hits.iter_mut().enumerate() {
                        let local = local_from_linear(linear, bs);
                        let global = origin + local;
                        *hit = in_domain(global, domain_size) && active(global);
                        if *hit {
                            let loc = mask_location(0, local, bs);
                            block_mask[loc.word] |= loc.bit_mask();
                            count += 1;
                        }
                    }
                    if count == 0 {
                        continue;
                    }
                    let id = index.insert(origin);
                    mask.extend_from_slice(&block_mask);
                    active_voxels += count;
                    if cfg!(debug_assertions) {
                        verify_block_mask(&mask, id, &hits, bs)?;
                    }
                }
            }
        }

        let device_blocks = vec![0..index.len() as u32];
        let num_blocks: usize = device_blocks.iter().map(|r| r.len()).sum();

        let mut neighbors = vec![NO_NEIGHBOR; num_blocks * NEIGHBOR_SLOTS];
        for (id, origin) in index.iter() {
            for slot in 0..NEIGHBOR_SLOTS {
                if let Some(nb) = index.get(origin + slot_offset(slot) * bs) {
                    neighbors[id as usize * NEIGHBOR_SLOTS + slot] = nb;
                }
            }
        }

        let origins: Vec<[i32; 3]> = index.iter().map(|(_, o)| o.to_array()).collect();
        let stencil_index: Vec<NghIdx> =
            stencil.neighbours().iter().map(|&p| NghIdx::from(p)).collect();

        let mut mask = MirroredTable::new(mask);
        let mut origins = MirroredTable::new(origins);
        let mut neighbors = MirroredTable::new(neighbors);
        let mut stencil_index = MirroredTable::new(stencil_index);
        if backend.device_type() == DeviceType::Accelerator {
            mask.upload();
            origins.upload();
            neighbors.upload();
            stencil_index.upload();
        }

        let spaces = build_spaces(
            &device_blocks,
            neighbors.host(),
            domain_size,
            bs,
            &mask,
            &origins,
        )?;

        tracing::info!(
            blocks = num_blocks,
            active_voxels,
            mask_bytes = mask.byte_len(),
            "grid built"
        );

        Ok(Self {
            data: Arc::new(GridData {
                backend: backend.clone(),
                domain_size,
                descriptor,
                stencil: stencil.clone(),
                index,
                device_blocks,
                active_voxels: vec![active_voxels],
                mask,
                origins,
                neighbors,
                stencil_index,
                spaces,
            }),
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.data.backend
    }

    pub fn descriptor(&self) -> &GridDescriptor {
        &self.data.descriptor
    }

    pub fn stencil(&self) -> &Stencil {
        &self.data.stencil
    }

    pub fn domain_size(&self) -> IVec3 {
        self.data.domain_size
    }

    pub fn block_size(&self) -> i32 {
        self.data.descriptor.block_size
    }

    /// Active blocks over all devices.
    pub fn num_blocks(&self) -> usize {
        self.data.device_blocks.iter().map(|r| r.len()).sum()
    }

    pub fn num_active_voxels(&self) -> u64 {
        self.data.active_voxels.iter().sum()
    }

    pub fn block_origin(&self, block: u32) -> Option<IVec3> {
        self.data.index.origin(block)
    }

    /// Id of the block adjacent to `block` in neighbor `slot`.
    pub fn neighbor_block(&self, block: u32, slot: usize) -> Option<u32> {
        if slot >= NEIGHBOR_SLOTS {
            return None;
        }
        self.data
            .neighbors
            .host()
            .get(block as usize * NEIGHBOR_SLOTS + slot)
            .copied()
            .filter(|&nb| nb != NO_NEIGHBOR)
    }

    /// Cell of an active global voxel.
    pub fn cell_at(&self, global: IVec3) -> Option<Cell> {
        if !in_domain(global, self.data.domain_size) {
            return None;
        }
        let bs = self.block_size();
        let origin = IVec3::new(
            global.x.div_euclid(bs),
            global.y.div_euclid(bs),
            global.z.div_euclid(bs),
        ) * bs;
        let block = self.data.index.get(origin)?;
        let cell = Cell::new(block, global - origin);
        self.is_active_cell(cell).then_some(cell)
    }

    pub fn is_active(&self, global: IVec3) -> bool {
        self.cell_at(global).is_some()
    }

    pub fn is_active_cell(&self, cell: Cell) -> bool {
        mask_bit(self.data.mask.host(), cell, self.block_size())
    }

    /// Whether `other` is a handle to this same grid.
    pub fn same_grid(&self, other: &BlockGrid) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Finest-grid coordinate of `cell`, or `None` when its block id is unknown.
    pub fn global_index(&self, cell: Cell) -> Option<IVec3> {
        Some(self.block_origin(cell.block)? + cell.local)
    }

    /// Active cell at `offset` from `cell`, crossing into an adjacent block
    /// through the neighbor table when needed.
    pub fn neighbor_cell(&self, cell: Cell, offset: IVec3) -> Option<Cell> {
        let bs = self.block_size();
        let (dir, local) = wrap_local(cell.local + offset, bs)?;
        let block = if dir == IVec3::ZERO {
            cell.block
        } else {
            self.neighbor_block(cell.block, neighbor_slot(dir)?)?
        };
        let target = Cell::new(block, local);
        self.is_active_cell(target).then_some(target)
    }

    /// Active cell at the `point`-th offset of the construction stencil.
    pub fn stencil_neighbor(&self, cell: Cell, point: usize) -> Option<Cell> {
        let offset = self.data.stencil_index.host().get(point)?.to_ivec3();
        self.neighbor_cell(cell, offset)
    }

    pub fn physical_position(&self, cell: Cell) -> Option<DVec3> {
        let d = &self.data.descriptor;
        Some(d.origin + d.spacing * self.global_index(cell)?.as_dvec3())
    }

    pub fn partition_space(&self, device: usize, data_view: DataView) -> Result<&PartitionIndexSpace> {
        self.data
            .spaces
            .get(device)
            .and_then(|views| views.get(data_view.index()))
            .ok_or_else(|| {
                Error::configuration(
                    "BlockGrid",
                    format!("no partition for device {device} view {data_view}"),
                )
            })
    }

    /// Device-resident mask table, present on accelerator backends.
    pub fn device_mask(&self) -> Option<&[u32]> {
        self.data.mask.device().map(|m| m.as_ref())
    }

    /// Deterministic fingerprint over geometry and every construction table.
    pub fn topology_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, bytemuck::bytes_of(&self.data.domain_size.to_array()));
        mix(&mut h, &self.block_size().to_le_bytes());
        mix(&mut h, self.data.mask.as_bytes());
        mix(&mut h, self.data.origins.as_bytes());
        mix(&mut h, self.data.neighbors.as_bytes());
        mix(&mut h, self.data.stencil_index.as_bytes());
        h
    }

    /// Wrap a per-cell kernel as a `device` Container over this grid.
    ///
    /// `build` declares field accesses through the Loader and returns the
    /// kernel. At run time the kernel visits every active cell of the
    /// requested data view.
    pub fn new_container<B, K>(&self, name: impl Into<String>, build: B) -> Result<Container>
    where
        B: FnOnce(&mut Loader) -> Result<K>,
        K: Fn(Cell) + Send + Sync + 'static,
    {
        let grid = self.clone();
        Container::factory(&self.data.backend, name, ExecutionKind::Device, move |loader| {
            let kernel = build(loader)?;
            Ok(Body::launch(move |_stream, data_view| {
                let space = grid.partition_space(0, data_view)?;
                for cell in space.cells() {
                    kernel(cell);
                }
                Ok(())
            }))
        })
    }

    /// Container of any kind whose body the caller assembles.
    pub fn new_container_with<B>(
        &self,
        name: impl Into<String>,
        kind: ExecutionKind,
        build: B,
    ) -> Result<Container>
    where
        B: FnOnce(&mut Loader) -> Result<Body>,
    {
        Container::factory(&self.data.backend, name, kind, build)
    }
}

impl std::fmt::Debug for BlockGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockGrid")
            .field("domain_size", &self.data.domain_size)
            .field("block_size", &self.block_size())
            .field("num_blocks", &self.num_blocks())
            .field("active_voxels", &self.num_active_voxels())
            .finish()
    }
}

fn in_domain(global: IVec3, domain_size: IVec3) -> bool {
    global.cmpge(IVec3::ZERO).all() && global.cmplt(domain_size).all()
}

/// Read back a freshly written block mask through the read path.
fn verify_block_mask(mask: &[u32], block: u32, hits: &[bool], bs: i32) -> Result<()> {
    for (linear, &hit) in hits.iter().enumerate() {
        let cell = Cell::new(block, local_from_linear(linear, bs));
        if mask_bit(mask, cell, bs) != hit {
            return Err(Error::construction_invariant(
                "BlockGrid",
                format!(
                    "mask of block {block} disagrees with the activity predicate at {}",
                    cell.local
                ),
            ));
        }
    }
    Ok(())
}

fn build_spaces(
    device_blocks: &[Range<u32>],
    neighbors: &[u32],
    domain_size: IVec3,
    bs: i32,
    mask: &MirroredTable<u32>,
    origins: &MirroredTable<[i32; 3]>,
) -> Result<Vec<Vec<PartitionIndexSpace>>> {
    let mut spaces = Vec::with_capacity(device_blocks.len());
    for (device, owned) in device_blocks.iter().enumerate() {
        let is_internal = |block: u32| {
            let slots = &neighbors
                [block as usize * NEIGHBOR_SLOTS..(block as usize + 1) * NEIGHBOR_SLOTS];
            slots.iter().all(|&nb| nb != NO_NEIGHBOR && owned.contains(&nb))
        };
        let mut views = Vec::with_capacity(DataView::COUNT);
        for view_index in 0..DataView::COUNT {
            let data_view = DataView::from_index(view_index)?;
            let blocks: Vec<u32> = match data_view {
                DataView::Standard => owned.clone().collect(),
                DataView::Internal => owned.clone().filter(|&b| is_internal(b)).collect(),
                DataView::Boundary => owned.clone().filter(|&b| !is_internal(b)).collect(),
            };
            tracing::debug!(device, %data_view, blocks = blocks.len(), "partition built");
            views.push(PartitionIndexSpace::new(
                device,
                data_view,
                domain_size,
                bs,
                blocks,
                mask.host().clone(),
                mask.device().cloned(),
                origins.host().clone(),
            ));
        }
        spaces.push(views);
    }
    Ok(spaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::opposite_slot;

    fn sphere(domain: i32, radius: f32) -> impl Fn(IVec3) -> bool {
        let c = (domain as f32 - 1.0) / 2.0;
        move |v: IVec3| (v.as_vec3() - glam::Vec3::splat(c)).length() <= radius
    }

    fn grid(domain: i32, bs: i32, pred: impl Fn(IVec3) -> bool) -> BlockGrid {
        BlockGrid::new(
            &Backend::cpu(),
            IVec3::splat(domain),
            pred,
            &Stencil::s7_laplace(),
            GridDescriptor::with_block_size(bs),
        )
        .unwrap()
    }

    #[test]
    fn mask_agrees_with_predicate() {
        for bs in [3, 4, 5] {
            let pred = sphere(13, 5.0);
            let g = grid(13, bs, sphere(13, 5.0));
            let mut expected = 0u64;
            for z in 0..13 {
                for y in 0..13 {
                    for x in 0..13 {
                        let v = IVec3::new(x, y, z);
                        assert_eq!(g.is_active(v), pred(v), "bs {bs} at {v}");
                        expected += pred(v) as u64;
                    }
                }
            }
            assert_eq!(g.num_active_voxels(), expected);
        }
    }

    #[test]
    fn blocks_without_active_voxels_get_no_id() {
        // only the corner block holds anything
        let g = grid(16, 4, |v| v.max_element() < 2);
        assert_eq!(g.num_blocks(), 1);
        assert_eq!(g.block_origin(0), Some(IVec3::ZERO));
        assert_eq!(g.cell_at(IVec3::new(3, 3, 3)), None);
        for slot in 0..NEIGHBOR_SLOTS {
            assert_eq!(g.neighbor_block(0, slot), None);
        }
    }

    #[test]
    fn ids_follow_x_fastest_enumeration() {
        let g = grid(8, 4, |_| true);
        assert_eq!(g.num_blocks(), 8);
        assert_eq!(g.block_origin(1), Some(IVec3::new(4, 0, 0)));
        assert_eq!(g.block_origin(2), Some(IVec3::new(0, 4, 0)));
        assert_eq!(g.block_origin(4), Some(IVec3::new(0, 0, 4)));
    }

    #[test]
    fn neighbor_table_is_symmetric() {
        let g = grid(20, 4, sphere(20, 8.0));
        for b in 0..g.num_blocks() as u32 {
            for slot in 0..NEIGHBOR_SLOTS {
                if let Some(nb) = g.neighbor_block(b, slot) {
                    assert_eq!(g.neighbor_block(nb, opposite_slot(slot)), Some(b));
                    assert_eq!(
                        g.block_origin(nb).unwrap() - g.block_origin(b).unwrap(),
                        slot_offset(slot) * 4
                    );
                }
            }
        }
    }

    #[test]
    fn neighbor_cell_crosses_blocks() {
        let g = grid(8, 4, |_| true);
        let c = g.cell_at(IVec3::new(3, 3, 3)).unwrap();
        let n = g.neighbor_cell(c, IVec3::new(1, 1, 1)).unwrap();
        assert_eq!(g.global_index(n), Some(IVec3::splat(4)));
        assert_ne!(n.block, c.block);
        // outside the domain
        let edge = g.cell_at(IVec3::ZERO).unwrap();
        assert_eq!(g.neighbor_cell(edge, IVec3::new(-1, 0, 0)), None);
    }

    #[test]
    fn stencil_neighbor_follows_stencil_order() {
        let g = grid(8, 4, |_| true);
        let c = g.cell_at(IVec3::new(4, 4, 4)).unwrap();
        let n = g.stencil_neighbor(c, 0).unwrap();
        assert_eq!(g.global_index(n), Some(IVec3::new(3, 4, 4)));
        assert_eq!(g.stencil_neighbor(c, 6), None);
    }

    #[test]
    fn partitions_are_complete_and_disjoint() {
        let g = grid(24, 4, sphere(24, 10.0));
        let standard = g.partition_space(0, DataView::Standard).unwrap();
        let internal = g.partition_space(0, DataView::Internal).unwrap();
        let boundary = g.partition_space(0, DataView::Boundary).unwrap();
        assert_eq!(standard.num_blocks(), g.num_blocks());
        assert!(internal.num_blocks() > 0);
        assert!(boundary.num_blocks() > 0);
        let mut union: Vec<u32> = internal.blocks().iter().chain(boundary.blocks()).copied().collect();
        union.sort_unstable();
        assert_eq!(union, standard.blocks());
        assert_eq!(
            internal.num_active_cells() + boundary.num_active_cells(),
            standard.num_active_cells()
        );
        assert_eq!(standard.num_active_cells() as u64, g.num_active_voxels());
        for &b in internal.blocks() {
            assert!((0..NEIGHBOR_SLOTS).all(|s| g.neighbor_block(b, s).is_some()));
        }
    }

    #[test]
    fn partition_cells_visit_in_block_then_local_order() {
        let g = grid(4, 2, |_| true);
        let space = g.partition_space(0, DataView::Standard).unwrap();
        let cells: Vec<Cell> = space.cells().take(3).collect();
        assert_eq!(cells[0], Cell::new(0, IVec3::ZERO));
        assert_eq!(cells[1], Cell::new(0, IVec3::X));
        assert_eq!(cells[2], Cell::new(0, IVec3::Y));
    }

    #[test]
    fn multi_device_backend_rejected() {
        let backend = Backend::new(DeviceType::Cpu, vec![0, 1], 1).unwrap();
        let err = BlockGrid::new(
            &backend,
            IVec3::splat(8),
            |_| true,
            &Stencil::s7_laplace(),
            GridDescriptor::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn invalid_geometry_rejected() {
        let backend = Backend::cpu();
        let s = Stencil::s7_laplace();
        assert!(BlockGrid::new(&backend, IVec3::new(8, 0, 8), |_| true, &s, GridDescriptor::default()).is_err());
        assert!(BlockGrid::new(&backend, IVec3::splat(8), |_| true, &s, GridDescriptor::with_block_size(0)).is_err());
        let wide = Stencil::new([IVec3::new(3, 0, 0)]);
        assert!(BlockGrid::new(&backend, IVec3::splat(8), |_| true, &wide, GridDescriptor::with_block_size(2)).is_err());
    }

    #[test]
    fn missing_partition_device() {
        let g = grid(8, 4, |_| true);
        assert!(g.partition_space(1, DataView::Standard).is_err());
    }

    #[test]
    fn accelerator_mirrors_tables() {
        let g = BlockGrid::new(
            &Backend::accelerator(),
            IVec3::splat(8),
            |_| true,
            &Stencil::s27(),
            GridDescriptor::with_block_size(4),
        )
        .unwrap();
        let space = g.partition_space(0, DataView::Standard).unwrap();
        assert_eq!(space.mask(DeviceType::Accelerator), space.mask(DeviceType::Cpu));
        assert!(g.device_mask().is_some());
        assert!(grid(8, 4, |_| true).device_mask().is_none());
    }

    #[test]
    fn topology_hash_is_deterministic() {
        let a = grid(16, 4, sphere(16, 6.0));
        let b = grid(16, 4, sphere(16, 6.0));
        let c = grid(16, 4, sphere(16, 5.0));
        assert_eq!(a.topology_hash(), b.topology_hash());
        assert_ne!(a.topology_hash(), c.topology_hash());
    }

    #[test]
    fn physical_position_uses_spacing_and_origin() {
        let descriptor = GridDescriptor {
            block_size: 4,
            spacing: DVec3::new(0.5, 1.0, 2.0),
            origin: DVec3::new(10.0, 0.0, -1.0),
        };
        let g = BlockGrid::new(&Backend::cpu(), IVec3::splat(8), |_| true, &Stencil::empty(), descriptor).unwrap();
        let c = g.cell_at(IVec3::new(2, 3, 4)).unwrap();
        assert_eq!(g.physical_position(c), Some(DVec3::new(11.0, 3.0, 7.0)));
    }

    #[test]
    fn unknown_block_has_no_global_index() {
        let g = grid(8, 4, |_| true);
        let stray = Cell::new(g.num_blocks() as u32, IVec3::ZERO);
        assert_eq!(g.global_index(stray), None);
        assert_eq!(g.physical_position(stray), None);
        let first = Cell::new(0, IVec3::new(1, 2, 3));
        assert_eq!(g.global_index(first), Some(g.block_origin(0).unwrap() + IVec3::new(1, 2, 3)));
    }
}
