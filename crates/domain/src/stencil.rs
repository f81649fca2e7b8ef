use bytemuck::{Pod, Zeroable};
use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Footprint of a stencil as relative offsets. The center is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stencil {
    points: Vec<IVec3>,
}

impl Stencil {
    /// Build a stencil; the center offset and duplicates are dropped.
    pub fn new(points: impl IntoIterator<Item = IVec3>) -> Self {
        let mut out: Vec<IVec3> = Vec::new();
        for p in points {
            if p != IVec3::ZERO && !out.contains(&p) {
                out.push(p);
            }
        }
        Self { points: out }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Six face neighbors.
    pub fn s7_laplace() -> Self {
        Self::new([
            IVec3::new(-1, 0, 0),
            IVec3::new(1, 0, 0),
            IVec3::new(0, -1, 0),
            IVec3::new(0, 1, 0),
            IVec3::new(0, 0, -1),
            IVec3::new(0, 0, 1),
        ])
    }

    /// All 26 face, edge and corner neighbors.
    pub fn s27() -> Self {
        let mut points = Vec::with_capacity(26);
        for z in -1..=1 {
            for y in -1..=1 {
                for x in -1..=1 {
                    points.push(IVec3::new(x, y, z));
                }
            }
        }
        Self::new(points)
    }

    pub fn neighbours(&self) -> &[IVec3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Largest absolute component over all offsets.
    pub fn max_reach(&self) -> i32 {
        self.points
            .iter()
            .map(|p| p.abs().max_element())
            .max()
            .unwrap_or(0)
    }
}

/// Compact per-device neighbor offset, as stored in the stencil table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NghIdx {
    pub x: i8,
    pub y: i8,
    pub z: i8,
}

impl NghIdx {
    pub fn to_ivec3(self) -> IVec3 {
        IVec3::new(self.x as i32, self.y as i32, self.z as i32)
    }
}

impl From<IVec3> for NghIdx {
    fn from(v: IVec3) -> Self {
        Self {
            x: v.x as i8,
            y: v.y as i8,
            z: v.z as i8,
        }
    }
}
