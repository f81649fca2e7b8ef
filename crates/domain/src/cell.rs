//! Pure addressing functions for cells inside blocks.
//!
//! The same `mask_location` is used when masks are written during
//! construction and when they are read during execution.

use glam::IVec3;

/// Bits per mask word.
pub const MASK_WORD_BITS: usize = 32;

/// Number of face, edge and corner neighbors of a block.
pub const NEIGHBOR_SLOTS: usize = 26;

/// Neighbor-table entry for a missing or inactive block.
pub const NO_NEIGHBOR: u32 = u32::MAX;

/// A voxel addressed by its block and its offset inside that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub block: u32,
    pub local: IVec3,
}

impl Cell {
    pub fn new(block: u32, local: IVec3) -> Self {
        Self { block, local }
    }
}

/// Word and bit of a cell inside the packed active mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskLocation {
    pub word: usize,
    pub bit: u32,
}

impl MaskLocation {
    pub fn bit_mask(self) -> u32 {
        1u32 << self.bit
    }
}

/// Voxels per block.
pub fn block_volume(block_size: i32) -> usize {
    let bs = block_size as usize;
    bs * bs * bs
}

/// Linear index of a local offset, x fastest.
pub fn local_linear(local: IVec3, block_size: i32) -> usize {
    let bs = block_size as usize;
    local.x as usize + local.y as usize * bs + local.z as usize * bs * bs
}

/// Inverse of [`local_linear`].
pub fn local_from_linear(linear: usize, block_size: i32) -> IVec3 {
    let bs = block_size as usize;
    IVec3::new(
        (linear % bs) as i32,
        ((linear / bs) % bs) as i32,
        (linear / (bs * bs)) as i32,
    )
}

/// Mask words reserved per block. Each block starts on a fresh word; when
/// the block volume is not a multiple of the word width the tail bits of the
/// last word are never set.
pub fn mask_words_per_block(block_size: i32) -> usize {
    block_volume(block_size).div_ceil(MASK_WORD_BITS)
}

pub fn mask_location(block: u32, local: IVec3, block_size: i32) -> MaskLocation {
    let linear = local_linear(local, block_size);
    MaskLocation {
        word: block as usize * mask_words_per_block(block_size) + linear / MASK_WORD_BITS,
        bit: (linear % MASK_WORD_BITS) as u32,
    }
}

/// Read a cell's bit from a packed mask table.
pub fn mask_bit(mask: &[u32], cell: Cell, block_size: i32) -> bool {
    let loc = mask_location(cell.block, cell.local, block_size);
    mask.get(loc.word).is_some_and(|w| w & loc.bit_mask() != 0)
}

pub fn in_block(local: IVec3, block_size: i32) -> bool {
    local.cmpge(IVec3::ZERO).all() && local.cmplt(IVec3::splat(block_size)).all()
}

/// Neighbor-table slot for a unit direction in `{-1,0,1}^3` other than zero.
pub fn neighbor_slot(dir: IVec3) -> Option<usize> {
    if dir == IVec3::ZERO || dir.abs().max_element() > 1 {
        return None;
    }
    let linear = ((dir.x + 1) + 3 * (dir.y + 1) + 9 * (dir.z + 1)) as usize;
    Some(if linear < 13 { linear } else { linear - 1 })
}

/// Direction stored in a neighbor-table slot.
pub fn slot_offset(slot: usize) -> IVec3 {
    debug_assert!(slot < NEIGHBOR_SLOTS);
    let linear = (if slot < 13 { slot } else { slot + 1 }) as i32;
    IVec3::new(linear % 3 - 1, (linear / 3) % 3 - 1, linear / 9 - 1)
}

/// Slot of the reverse direction.
pub fn opposite_slot(slot: usize) -> usize {
    NEIGHBOR_SLOTS - 1 - slot
}

/// Parent coordinate of a child under refinement factor `ref_factor`.
pub fn child_to_parent(child: IVec3, ref_factor: i32) -> IVec3 {
    IVec3::new(
        child.x.div_euclid(ref_factor),
        child.y.div_euclid(ref_factor),
        child.z.div_euclid(ref_factor),
    )
}

/// Offset of a child inside its parent, each axis in `[0, ref_factor)`.
pub fn child_sub_offset(child: IVec3, ref_factor: i32) -> IVec3 {
    IVec3::new(
        child.x.rem_euclid(ref_factor),
        child.y.rem_euclid(ref_factor),
        child.z.rem_euclid(ref_factor),
    )
}

pub fn parent_to_child(parent: IVec3, ref_factor: i32, sub: IVec3) -> IVec3 {
    parent * ref_factor + sub
}

/// Split a possibly out-of-block local offset into a block direction and
/// the wrapped local offset. Returns `None` when the offset reaches further
/// than one block away.
pub fn wrap_local(local: IVec3, block_size: i32) -> Option<(IVec3, IVec3)> {
    let dir = IVec3::new(
        local.x.div_euclid(block_size),
        local.y.div_euclid(block_size),
        local.z.div_euclid(block_size),
    );
    if dir.abs().max_element() > 1 {
        return None;
    }
    Some((dir, local - dir * block_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_roundtrip() {
        for bs in [1, 3, 4, 8] {
            for lin in 0..block_volume(bs) {
                let local = local_from_linear(lin, bs);
                assert!(in_block(local, bs));
                assert_eq!(local_linear(local, bs), lin);
            }
        }
    }

    #[test]
    fn mask_location_is_a_bijection_with_remainder() {
        // 27 voxels in one 32-bit word, 125 in four words
        for bs in [3, 5, 8] {
            let words = mask_words_per_block(bs);
            assert_eq!(words, block_volume(bs).div_ceil(32));
            let mut seen = std::collections::HashSet::new();
            for block in 0..3u32 {
                for lin in 0..block_volume(bs) {
                    let loc = mask_location(block, local_from_linear(lin, bs), bs);
                    assert!(loc.word >= block as usize * words);
                    assert!(loc.word < (block as usize + 1) * words);
                    assert!(seen.insert((loc.word, loc.bit)));
                }
            }
        }
    }

    #[test]
    fn mask_bit_reads_what_was_written() {
        let bs = 3;
        let mut mask = vec![0u32; 2 * mask_words_per_block(bs)];
        let cell = Cell::new(1, IVec3::new(2, 1, 2));
        let loc = mask_location(cell.block, cell.local, bs);
        mask[loc.word] |= loc.bit_mask();
        assert!(mask_bit(&mask, cell, bs));
        assert!(!mask_bit(&mask, Cell::new(0, cell.local), bs));
        assert_eq!(mask.iter().map(|w| w.count_ones()).sum::<u32>(), 1);
    }

    #[test]
    fn neighbor_slots_cover_26_directions() {
        let mut slots = Vec::new();
        for z in -1..=1 {
            for y in -1..=1 {
                for x in -1..=1 {
                    let dir = IVec3::new(x, y, z);
                    match neighbor_slot(dir) {
                        Some(s) => {
                            assert_eq!(slot_offset(s), dir);
                            slots.push(s);
                        }
                        None => assert_eq!(dir, IVec3::ZERO),
                    }
                }
            }
        }
        slots.sort_unstable();
        assert_eq!(slots, (0..NEIGHBOR_SLOTS).collect::<Vec<_>>());
    }

    #[test]
    fn opposite_slot_negates_direction() {
        for s in 0..NEIGHBOR_SLOTS {
            assert_eq!(slot_offset(opposite_slot(s)), -slot_offset(s));
        }
    }

    #[test]
    fn non_unit_direction_has_no_slot() {
        assert_eq!(neighbor_slot(IVec3::new(2, 0, 0)), None);
    }

    #[test]
    fn parent_child_transforms() {
        let rf = 2;
        let child = IVec3::new(5, 0, 7);
        let parent = child_to_parent(child, rf);
        assert_eq!(parent, IVec3::new(2, 0, 3));
        let sub = child_sub_offset(child, rf);
        assert_eq!(parent_to_child(parent, rf, sub), child);

        // floor, not truncation
        assert_eq!(child_to_parent(IVec3::new(-1, -2, -3), 2), IVec3::new(-1, -1, -2));
    }

    #[test]
    fn wrap_local_across_blocks() {
        let bs = 4;
        assert_eq!(
            wrap_local(IVec3::new(-1, 2, 4), bs),
            Some((IVec3::new(-1, 0, 1), IVec3::new(3, 2, 0)))
        );
        assert_eq!(wrap_local(IVec3::new(1, 1, 1), bs), Some((IVec3::ZERO, IVec3::ONE)));
        assert_eq!(wrap_local(IVec3::new(8, 0, 0), bs), None);
    }
}
