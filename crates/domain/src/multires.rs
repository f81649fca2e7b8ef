//! Stacked block grids, one per resolution level, linked parent to child.
//!
//! Level 0 is the finest. Level `l + 1` coarsens level `l` by
//! `ref_factor(l)` on every axis. A coarse voxel is active when the activity
//! function accepts it or when any of its children is active, so every
//! active child has an active parent.

use std::ops::{Add, Deref};
use std::sync::Arc;

use glam::IVec3;

use blockspace_common::{Error, FieldUid, Result};
use blockspace_set::{Backend, BoundaryExchange, Container, Loadable, Loader};

use crate::cell::{Cell, child_to_parent, parent_to_child};
use crate::descriptor::MultiResDescriptor;
use crate::field::{BlockField, FieldPartition, FieldPartitionMut};
use crate::grid::BlockGrid;
use crate::stencil::Stencil;

#[derive(Debug)]
struct MultiResData {
    domain_size: IVec3,
    descriptor: MultiResDescriptor,
    levels: Vec<BlockGrid>,
}

#[derive(Debug, Clone)]
pub struct MultiResGrid {
    data: Arc<MultiResData>,
}

impl MultiResGrid {
    /// Build every level, finest first.
    ///
    /// `activity(level, v)` receives `v` in finest-level coordinates: the
    /// min corner of the level voxel.
    pub fn new<F>(
        backend: &Backend,
        domain_size: IVec3,
        activity: F,
        stencil: &Stencil,
        descriptor: MultiResDescriptor,
    ) -> Result<Self>
    where
        F: Fn(usize, IVec3) -> bool,
    {
        descriptor.validate()?;
        let depth = descriptor.depth();
        let _span = tracing::info_span!("multires_build", depth, domain = ?domain_size).entered();

        let mut levels: Vec<BlockGrid> = Vec::with_capacity(depth);
        for level in 0..depth {
            let spacing = descriptor.level_spacing(level);
            let finer = level
                .checked_sub(1)
                .and_then(|l| Some((levels.get(l)?.clone(), descriptor.ref_factor(l)?)));
            let grid = BlockGrid::new(
                backend,
                descriptor.level_domain(level, domain_size),
                |v: IVec3| {
                    activity(level, v * spacing)
                        || finer
                            .as_ref()
                            .is_some_and(|(child, rf)| has_active_child(child, v, *rf))
                },
                stencil,
                descriptor.level_descriptor(level),
            )?;
            tracing::debug!(level, blocks = grid.num_blocks(), "level built");
            levels.push(grid);
        }

        Ok(Self {
            data: Arc::new(MultiResData {
                domain_size,
                descriptor,
                levels,
            }),
        })
    }

    pub fn depth(&self) -> usize {
        self.data.levels.len()
    }

    /// Finest-level domain.
    pub fn domain_size(&self) -> IVec3 {
        self.data.domain_size
    }

    pub fn descriptor(&self) -> &MultiResDescriptor {
        &self.data.descriptor
    }

    pub fn level(&self, level: usize) -> Result<&BlockGrid> {
        self.data
            .levels
            .get(level)
            .ok_or_else(|| self.out_of_range(level))
    }

    /// Factor scaling `level` into `level + 1`.
    pub fn ref_factor(&self, level: usize) -> Result<i32> {
        self.data
            .descriptor
            .ref_factor(level)
            .ok_or_else(|| self.out_of_range(level))
    }

    /// Voxel edge of `level` in finest-level voxels.
    pub fn spacing(&self, level: usize) -> Result<i32> {
        if level >= self.depth() {
            return Err(self.out_of_range(level));
        }
        Ok(self.data.descriptor.level_spacing(level))
    }

    fn out_of_range(&self, level: usize) -> Error {
        Error::configuration(
            "MultiResGrid",
            format!("level {level} out of range, depth is {}", self.depth()),
        )
    }

    /// Parent of `cell` one level coarser, `None` on the top level.
    pub fn parent_of(&self, level: usize, cell: Cell) -> Option<Cell> {
        let coarse = self.data.levels.get(level.checked_add(1)?)?;
        let global = self.data.levels.get(level)?.global_index(cell)?;
        let rf = self.data.descriptor.ref_factor(level)?;
        coarse.cell_at(child_to_parent(global, rf))
    }

    /// Active children of `cell` one level finer, in z, y, x order. `None`
    /// on level 0 and past the top level.
    pub fn children_of(&self, level: usize, cell: Cell) -> Option<Vec<Cell>> {
        let fine_level = level.checked_sub(1)?;
        let parent = self.data.levels.get(level)?.global_index(cell)?;
        let fine = self.data.levels.get(fine_level)?;
        let rf = self.data.descriptor.ref_factor(fine_level)?;
        Some(
            sub_offsets(rf)
                .filter_map(|sub| fine.cell_at(parent_to_child(parent, rf, sub)))
                .collect(),
        )
    }

    /// `device` Container over the active cells of one level.
    pub fn new_container<B, K>(
        &self,
        level: usize,
        name: impl Into<String>,
        build: B,
    ) -> Result<Container>
    where
        B: FnOnce(&mut Loader) -> Result<K>,
        K: Fn(Cell) + Send + Sync + 'static,
    {
        self.level(level)?.new_container(name, build)
    }

    /// A field with storage on every level under one identity.
    pub fn new_field<T>(&self, name: impl Into<String>, cardinality: usize, inactive: T) -> MultiResField<T>
    where
        T: Copy + Send + Sync + 'static,
    {
        let uid = FieldUid::new();
        let name = name.into();
        let levels = self
            .data
            .levels
            .iter()
            .map(|g| BlockField::with_uid(g, uid, name.clone(), cardinality, inactive))
            .collect();
        MultiResField {
            uid,
            name,
            grid: self.clone(),
            levels,
        }
    }
}

fn sub_offsets(rf: i32) -> impl Iterator<Item = IVec3> {
    (0..rf).flat_map(move |z| (0..rf).flat_map(move |y| (0..rf).map(move |x| IVec3::new(x, y, z))))
}

fn has_active_child(child: &BlockGrid, v: IVec3, rf: i32) -> bool {
    sub_offsets(rf).any(|sub| child.is_active(parent_to_child(v, rf, sub)))
}

pub struct MultiResField<T> {
    uid: FieldUid,
    name: String,
    grid: MultiResGrid,
    levels: Vec<BlockField<T>>,
}

impl<T> Clone for MultiResField<T> {
    fn clone(&self) -> Self {
        Self {
            uid: self.uid,
            name: self.name.clone(),
            grid: self.grid.clone(),
            levels: self.levels.clone(),
        }
    }
}

impl<T> MultiResField<T>
where
    T: Copy + Send + Sync + 'static,
{
    pub fn uid(&self) -> FieldUid {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self, level: usize) -> Result<&BlockField<T>> {
        self.levels.get(level).ok_or_else(|| {
            Error::configuration(
                "MultiResField",
                format!("level {level} out of range, depth is {}", self.levels.len()),
            )
        })
    }

    /// Loadable view of one level.
    pub fn at(&self, level: usize) -> Result<MultiResLevel<T>> {
        self.level(level)?;
        Ok(MultiResLevel {
            field: self.clone(),
            level,
        })
    }

    pub fn get(&self, level: usize, global: IVec3, component: usize) -> Result<T> {
        Ok(self.level(level)?.get(global, component))
    }

    pub fn for_each_active_cell<F>(&self, level: usize, f: F) -> Result<()>
    where
        F: FnMut(IVec3, usize, &mut T),
    {
        self.level(level)?.for_each_active_cell(f)
    }
}

/// One level of a [`MultiResField`], as handed to a Loader.
pub struct MultiResLevel<T> {
    field: MultiResField<T>,
    level: usize,
}

impl<T> Loadable for MultiResLevel<T>
where
    T: Copy + Send + Sync + 'static,
{
    type Partition = MultiResPartition<T>;
    type PartitionMut = MultiResPartitionMut<T>;

    fn uid(&self) -> FieldUid {
        self.field.uid
    }

    fn name(&self) -> &str {
        &self.field.name
    }

    fn partition(&self) -> MultiResPartition<T> {
        let levels = &self.field.levels;
        MultiResPartition {
            level: self.level,
            grid: self.field.grid.clone(),
            own: levels[self.level].partition(),
            parent: levels.get(self.level + 1).map(Loadable::partition),
        }
    }

    fn partition_mut(&self) -> MultiResPartitionMut<T> {
        let levels = &self.field.levels;
        MultiResPartitionMut {
            view: self.partition(),
            own: levels[self.level].partition_mut(),
            parent: levels.get(self.level + 1).map(Loadable::partition_mut),
        }
    }

    fn boundary_exchange(&self) -> Option<Arc<dyn BoundaryExchange>> {
        self.field.levels[self.level].boundary_exchange()
    }
}

/// Read handle on one level, with access to the parent level.
pub struct MultiResPartition<T> {
    level: usize,
    grid: MultiResGrid,
    own: FieldPartition<T>,
    parent: Option<FieldPartition<T>>,
}

impl<T: Copy> MultiResPartition<T> {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn read(&self, cell: Cell, component: usize) -> T {
        self.own.read(cell, component)
    }

    pub fn neighbor(&self, cell: Cell, offset: IVec3, component: usize) -> Option<T> {
        self.own.neighbor(cell, offset, component)
    }

    pub fn has_parent(&self, cell: Cell) -> bool {
        self.grid.parent_of(self.level, cell).is_some()
    }

    /// Parent value, or `None` on the coarsest level.
    pub fn parent(&self, cell: Cell, component: usize) -> Option<T> {
        let p = self.grid.parent_of(self.level, cell)?;
        Some(self.parent.as_ref()?.read(p, component))
    }

    /// Active children one level finer; empty on level 0.
    pub fn children(&self, cell: Cell) -> Vec<Cell> {
        self.grid.children_of(self.level, cell).unwrap_or_default()
    }
}

/// Read-write handle on one level; writes may also target the parent.
pub struct MultiResPartitionMut<T> {
    view: MultiResPartition<T>,
    own: FieldPartitionMut<T>,
    parent: Option<FieldPartitionMut<T>>,
}

impl<T: Copy> MultiResPartitionMut<T> {
    pub fn write(&self, cell: Cell, component: usize, value: T) {
        self.own.write(cell, component, value);
    }

    /// Atomically apply `f` to the parent slot. Returns `false` when the
    /// cell has no parent.
    pub fn parent_update(&self, cell: Cell, component: usize, f: impl FnOnce(T) -> T) -> bool {
        match (self.view.grid.parent_of(self.view.level, cell), &self.parent) {
            (Some(p), Some(parent)) => {
                parent.update(p, component, f);
                true
            }
            _ => false,
        }
    }

    pub fn parent_add(&self, cell: Cell, component: usize, value: T) -> bool
    where
        T: Add<Output = T>,
    {
        self.parent_update(cell, component, |old| old + value)
    }
}

impl<T> Deref for MultiResPartitionMut<T> {
    type Target = MultiResPartition<T>;

    fn deref(&self) -> &MultiResPartition<T> {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockspace_common::DataView;

    /// 24^3 finest domain, three levels, refinement 2. Level 0 is active for
    /// x < 8, level 1 for 8 <= x < 16, level 2 for x >= 16 (finest coords).
    fn bands() -> MultiResGrid {
        MultiResGrid::new(
            &Backend::cpu(),
            IVec3::splat(24),
            |level, v| match level {
                0 => v.x < 8,
                1 => (8..16).contains(&v.x),
                _ => v.x >= 16,
            },
            &Stencil::s7_laplace(),
            MultiResDescriptor::new(4, vec![2, 2, 2]),
        )
        .unwrap()
    }

    fn level_cells(grid: &MultiResGrid, level: usize) -> Vec<Cell> {
        grid.level(level)
            .unwrap()
            .partition_space(0, DataView::Standard)
            .unwrap()
            .cells()
            .collect()
    }

    #[test]
    fn level_geometry() {
        let g = bands();
        assert_eq!(g.depth(), 3);
        assert_eq!(g.spacing(2).unwrap(), 4);
        assert_eq!(g.level(1).unwrap().domain_size(), IVec3::splat(12));
        assert_eq!(g.level(2).unwrap().domain_size(), IVec3::splat(6));
        assert!(g.level(3).is_err());
        // finest band plus closure: level 1 covers fine x < 16, level 2 everything
        assert_eq!(g.level(0).unwrap().num_active_voxels(), 8 * 24 * 24);
        assert_eq!(g.level(1).unwrap().num_active_voxels(), 8 * 12 * 12);
        assert_eq!(g.level(2).unwrap().num_active_voxels(), 6 * 6 * 6);
    }

    #[test]
    fn every_active_child_has_a_parent() {
        let g = bands();
        for level in 0..2 {
            for cell in level_cells(&g, level) {
                let parent = g.parent_of(level, cell).unwrap();
                assert!(g.children_of(level + 1, parent).unwrap().contains(&cell));
            }
        }
        for cell in level_cells(&g, 2) {
            assert_eq!(g.parent_of(2, cell), None);
        }
        assert_eq!(g.children_of(0, level_cells(&g, 0)[0]), None);
    }

    #[test]
    fn levels_past_the_top_are_rejected() {
        let g = bands();
        let top = g.level(2).unwrap().cell_at(IVec3::ZERO).unwrap();
        assert_eq!(g.ref_factor(2).unwrap(), 2);
        assert!(matches!(g.ref_factor(3), Err(Error::Configuration { .. })));
        assert!(matches!(g.spacing(3), Err(Error::Configuration { .. })));
        assert_eq!(g.children_of(3, top), None);
        assert_eq!(g.parent_of(3, top), None);
        assert_eq!(g.children_of(2, top).unwrap().len(), 8);
    }

    #[test]
    fn invalid_ref_factor_rejected() {
        let err = MultiResGrid::new(
            &Backend::cpu(),
            IVec3::splat(8),
            |_, _| true,
            &Stencil::empty(),
            MultiResDescriptor::new(4, vec![2, 0]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn pull_from_parent() {
        let g = bands();
        let x = g.new_field("x", 1, -1i32);
        let has_parent = g.new_field("hasParent", 1, -1i32);
        for l in 0..3 {
            x.for_each_active_cell(l, |_, _, v| *v = l as i32 + 1).unwrap();
            has_parent.for_each_active_cell(l, |_, _, v| *v = -1).unwrap();
        }

        for l in 0..3 {
            let c = g
                .new_container(l, "pull", |loader| {
                    let xp = loader.load_mut(&x.at(l)?);
                    let hp = loader.load_mut(&has_parent.at(l)?);
                    Ok(move |cell: Cell| {
                        if let Some(p) = xp.parent(cell, 0) {
                            hp.write(cell, 0, 1);
                            xp.write(cell, 0, p);
                        }
                    })
                })
                .unwrap();
            c.run(0, DataView::Standard).unwrap();
        }

        let check = |level: usize, x_expected: i32, hp_expected: i32| {
            let grid = g.level(level).unwrap();
            for cell in level_cells(&g, level) {
                let idx = grid.global_index(cell).unwrap();
                assert_eq!(x.get(level, idx, 0).unwrap(), x_expected, "x at level {level} {idx}");
                assert_eq!(has_parent.get(level, idx, 0).unwrap(), hp_expected);
            }
        };
        check(0, 2, 1);
        check(1, 3, 1);
        check(2, 3, -1);
    }

    #[test]
    fn accumulate_into_parent() {
        let g = bands();
        let x = g.new_field("x", 1, 0i64);
        for l in 0..3 {
            x.for_each_active_cell(l, |_, _, v| *v = l as i64 + 1).unwrap();
        }

        for l in 0..3 {
            let c = g
                .new_container(l, "accumulate", |loader| {
                    let xp = loader.load_mut(&x.at(l)?);
                    Ok(move |cell: Cell| {
                        xp.parent_add(cell, 0, xp.read(cell, 0));
                    })
                })
                .unwrap();
            c.run(0, DataView::Standard).unwrap();
        }

        // level 0 untouched
        assert_eq!(x.get(0, IVec3::new(7, 23, 0), 0).unwrap(), 1);
        // level 1 voxels with eight active children
        assert_eq!(x.get(1, IVec3::new(3, 5, 5), 0).unwrap(), 2 + 8);
        // level 1 voxels active through their own band only
        assert_eq!(x.get(1, IVec3::new(4, 0, 0), 0).unwrap(), 2);
        // level 2 sums the already-accumulated level 1 values. Passes run
        // finest first, so this is 3 + 8 * 10 and not 3 + 2 * 8 = 19 as it
        // would be if every pass read the initial values.
        assert_eq!(x.get(2, IVec3::new(1, 2, 3), 0).unwrap(), 3 + 8 * 10);
        assert_eq!(x.get(2, IVec3::new(3, 0, 0), 0).unwrap(), 3 + 8 * 2);
        assert_eq!(x.get(2, IVec3::new(5, 5, 5), 0).unwrap(), 3);
    }

    #[test]
    fn levels_share_field_identity() {
        let g = bands();
        let x = g.new_field("x", 1, 0.0f32);
        assert_eq!(x.at(0).unwrap().uid(), x.at(2).unwrap().uid());
        assert_eq!(x.level(1).unwrap().uid(), x.uid());
        assert!(x.at(3).is_err());
    }
}
