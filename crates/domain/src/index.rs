use glam::IVec3;
use std::collections::HashMap;

/// Maps a block origin to its integer id.
///
/// Ids are handed out in insertion order and never reassigned, so the
/// enumeration order of construction fixes every id.
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    ids: HashMap<IVec3, u32>,
    origins: Vec<IVec3>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block origin and return its id. Registering an origin
    /// twice returns the id it already has.
    pub fn insert(&mut self, origin: IVec3) -> u32 {
        if let Some(&id) = self.ids.get(&origin) {
            return id;
        }
        let id = self.origins.len() as u32;
        self.ids.insert(origin, id);
        self.origins.push(origin);
        id
    }

    pub fn get(&self, origin: IVec3) -> Option<u32> {
        self.ids.get(&origin).copied()
    }

    pub fn origin(&self, id: u32) -> Option<IVec3> {
        self.origins.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// `(id, origin)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, IVec3)> + '_ {
        self.origins
            .iter()
            .enumerate()
            .map(|(id, &origin)| (id as u32, origin))
    }
}
