use std::path::Path;

use anyhow::Context;
use glam::IVec3;
use serde::{Deserialize, Serialize};

use blockspace_common::DeviceType;
use blockspace_domain::{GridDescriptor, MultiResDescriptor};
use blockspace_set::Backend;

/// Region of the domain that holds active voxels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    /// Every voxel of the domain.
    Full,
    /// Ball centered in the domain.
    Sphere { radius: f32 },
    /// Voxels whose coordinate on `axis` is below `limit`.
    Slab { axis: usize, limit: i32 },
}

impl Shape {
    pub fn predicate(&self, domain: IVec3) -> Box<dyn Fn(IVec3) -> bool> {
        match *self {
            Shape::Full => Box::new(|_| true),
            Shape::Sphere { radius } => {
                let center = (domain.as_vec3() - glam::Vec3::ONE) / 2.0;
                Box::new(move |v: IVec3| (v.as_vec3() - center).length() <= radius)
            }
            Shape::Slab { axis, limit } => Box::new(move |v: IVec3| v[axis.min(2)] < limit),
        }
    }
}

/// Everything a CLI run needs to build a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub domain: IVec3,
    pub shape: Shape,
    pub descriptor: GridDescriptor,
    pub device: DeviceType,
    pub streams: usize,
    /// Build a multi-resolution grid instead of a single level.
    pub multires: Option<MultiResDescriptor>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            domain: IVec3::splat(32),
            shape: Shape::Sphere { radius: 12.0 },
            descriptor: GridDescriptor::default(),
            device: DeviceType::Cpu,
            streams: 1,
            multires: None,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), ?config, "config loaded");
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn backend(&self) -> anyhow::Result<Backend> {
        Ok(Backend::new(self.device, vec![0], self.streams)?)
    }
}
