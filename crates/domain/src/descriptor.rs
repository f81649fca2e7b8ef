use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};

use blockspace_common::{Error, Result};

/// Default block edge length.
pub const DEFAULT_BLOCK_SIZE: i32 = 8;

/// Construction parameters of a single-resolution grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridDescriptor {
    /// Edge length of a block, in voxels.
    pub block_size: i32,
    /// Physical size of one voxel along each axis.
    pub spacing: DVec3,
    /// Physical position of voxel (0,0,0).
    pub origin: DVec3,
}

impl Default for GridDescriptor {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            spacing: DVec3::ONE,
            origin: DVec3::ZERO,
        }
    }
}

impl GridDescriptor {
    pub fn with_block_size(block_size: i32) -> Self {
        Self {
            block_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size < 1 {
            return Err(Error::configuration(
                "GridDescriptor",
                format!("block size must be positive, got {}", self.block_size),
            ));
        }
        if self.block_size > i8::MAX as i32 {
            return Err(Error::configuration(
                "GridDescriptor",
                format!("block size {} exceeds {}", self.block_size, i8::MAX),
            ));
        }
        Ok(())
    }
}

/// Construction parameters of a multi-resolution grid.
///
/// `ref_factors[l]` scales level `l` into level `l + 1`; the number of
/// entries is the depth. The top level's factor is kept for symmetry and not
/// used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiResDescriptor {
    pub block_size: i32,
    pub ref_factors: Vec<i32>,
    /// Physical size of a finest-level voxel.
    pub spacing: DVec3,
    pub origin: DVec3,
}

impl Default for MultiResDescriptor {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            ref_factors: vec![2, 2, 2],
            spacing: DVec3::ONE,
            origin: DVec3::ZERO,
        }
    }
}

impl MultiResDescriptor {
    pub fn new(block_size: i32, ref_factors: Vec<i32>) -> Self {
        Self {
            block_size,
            ref_factors,
            ..Default::default()
        }
    }

    pub fn depth(&self) -> usize {
        self.ref_factors.len()
    }

    /// Factor scaling `level` into `level + 1`, `None` past the top level.
    pub fn ref_factor(&self, level: usize) -> Option<i32> {
        self.ref_factors.get(level).copied()
    }

    /// Voxel edge of `level` measured in finest-level voxels.
    pub fn level_spacing(&self, level: usize) -> i32 {
        self.ref_factors.iter().take(level).product()
    }

    /// Domain of `level` given the finest-level domain.
    pub fn level_domain(&self, level: usize, domain_size: IVec3) -> IVec3 {
        let s = self.level_spacing(level);
        IVec3::new(
            div_up(domain_size.x, s),
            div_up(domain_size.y, s),
            div_up(domain_size.z, s),
        )
    }

    /// Single-resolution descriptor of one level.
    pub fn level_descriptor(&self, level: usize) -> GridDescriptor {
        GridDescriptor {
            block_size: self.block_size,
            spacing: self.spacing * self.level_spacing(level) as f64,
            origin: self.origin,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ref_factors.is_empty() {
            return Err(Error::configuration(
                "MultiResDescriptor",
                "at least one level is required",
            ));
        }
        if let Some((level, rf)) = self
            .ref_factors
            .iter()
            .enumerate()
            .find(|(_, rf)| **rf < 1)
        {
            return Err(Error::configuration(
                "MultiResDescriptor",
                format!("refinement factor of level {level} must be positive, got {rf}"),
            ));
        }
        self.level_descriptor(0).validate()
    }
}

pub(crate) fn div_up(a: i32, b: i32) -> i32 {
    (a + b - 1) / b
}
