use bytemuck::Pod;
use std::sync::Arc;

/// A construction-time table with an optional accelerator-resident copy.
///
/// Both copies are immutable once built and shared by reference count, so
/// every partition and field can hold them without copying.
#[derive(Debug, Clone)]
pub struct MirroredTable<T: Pod> {
    host: Arc<[T]>,
    device: Option<Arc<[T]>>,
}

impl<T: Pod> MirroredTable<T> {
    pub fn new(host: Vec<T>) -> Self {
        Self {
            host: host.into(),
            device: None,
        }
    }

    /// Copy the host table into device-resident memory.
    pub fn upload(&mut self) {
        let copy: Arc<[T]> = Arc::from(self.host.to_vec());
        tracing::trace!(bytes = self.byte_len(), "table mirrored to device");
        self.device = Some(copy);
    }

    pub fn host(&self) -> &Arc<[T]> {
        &self.host
    }

    pub fn device(&self) -> Option<&Arc<[T]>> {
        self.device.as_ref()
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.host)
    }

    pub fn byte_len(&self) -> usize {
        self.as_bytes().len()
    }
}
