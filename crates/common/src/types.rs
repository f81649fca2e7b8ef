use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Integer 3D index used for domain sizes, voxel coordinates and block origins.
pub type Index3d = IVec3;

/// Unique identity of a field, shared by every level and partition of it.
///
/// Tokens are keyed by this id, so two handles to the same storage must
/// report the same uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldUid(pub Uuid);

impl FieldUid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FieldUid {
    fn default() -> Self {
        Self::new()
    }
}

/// Named subset of the active blocks a Container runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataView {
    /// Every active block owned by the device.
    Standard,
    /// Blocks whose 26 neighbors are all present and owned by the same device.
    Internal,
    /// `Standard` minus `Internal`.
    Boundary,
}

impl DataView {
    /// Number of data views. Partition tables are sized from this.
    pub const COUNT: usize = 3;

    pub const ALL: [DataView; Self::COUNT] =
        [DataView::Standard, DataView::Internal, DataView::Boundary];

    /// Dense index into per-view tables.
    pub fn index(self) -> usize {
        match self {
            DataView::Standard => 0,
            DataView::Internal => 1,
            DataView::Boundary => 2,
        }
    }

    /// Inverse of [`DataView::index`]. Anything past the third entry is a
    /// configuration error.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            Error::configuration(
                "DataView",
                format!("inconsistent enumeration: index {index} outside 0..{}", Self::COUNT),
            )
        })
    }
}

impl fmt::Display for DataView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataView::Standard => "standard",
            DataView::Internal => "internal",
            DataView::Boundary => "boundary",
        };
        f.write_str(s)
    }
}

/// Kind of device a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Host execution, sequential.
    #[default]
    Cpu,
    /// Accelerator execution with device-resident table mirrors.
    Accelerator,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => f.write_str("cpu"),
            DeviceType::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// How a Container touches a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
}

/// Pattern of a field access within one Container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compute {
    /// Each cell touches only itself.
    Map,
    /// Cells read neighbor values through stencil offsets.
    Stencil,
    /// Cells contribute to a global scalar.
    Reduce,
}
