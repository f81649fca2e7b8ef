use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use blockspace_common::{DeviceType, Error, Result};

/// An ordered queue of work on one device.
///
/// Synchronization is the only blocking point the substrate exposes; the
/// counter lets callers observe that a reduction actually waited.
#[derive(Debug)]
pub struct Stream {
    device: usize,
    index: usize,
    syncs: AtomicU64,
}

impl Stream {
    fn new(device: usize, index: usize) -> Self {
        Self {
            device,
            index,
            syncs: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Block until all work queued on this stream has completed.
    pub fn sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(device = self.device, stream = self.index, "stream sync");
    }

    /// Number of times [`Stream::sync`] has been called.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }
}

/// Explicit execution context threaded through grid and Container construction.
///
/// Holds the device kind, the device set, and a fixed number of streams per
/// device. Cloning is cheap and clones share the same streams.
#[derive(Debug, Clone)]
pub struct Backend {
    device_type: DeviceType,
    device_ids: Arc<[usize]>,
    streams: Arc<[Vec<Stream>]>,
}

impl Backend {
    /// Create a backend over `device_ids` with `streams_per_device` streams each.
    pub fn new(
        device_type: DeviceType,
        device_ids: Vec<usize>,
        streams_per_device: usize,
    ) -> Result<Self> {
        if device_ids.is_empty() {
            return Err(Error::configuration("Backend", "device set is empty"));
        }
        if streams_per_device == 0 {
            return Err(Error::configuration(
                "Backend",
                "at least one stream per device is required",
            ));
        }
        let streams: Vec<Vec<Stream>> = (0..device_ids.len())
            .map(|dev| (0..streams_per_device).map(|s| Stream::new(dev, s)).collect())
            .collect();
        tracing::debug!(
            %device_type,
            devices = device_ids.len(),
            streams_per_device,
            "backend created"
        );
        Ok(Self {
            device_type,
            device_ids: device_ids.into(),
            streams: streams.into(),
        })
    }

    /// Single host device with one stream.
    pub fn cpu() -> Self {
        Self::single(DeviceType::Cpu)
    }

    /// Single accelerator device with one stream.
    pub fn accelerator() -> Self {
        Self::single(DeviceType::Accelerator)
    }

    fn single(device_type: DeviceType) -> Self {
        Self {
            device_type,
            device_ids: Arc::from(vec![0]),
            streams: Arc::from(vec![vec![Stream::new(0, 0)]]),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Number of devices (partitions) in the set.
    pub fn device_count(&self) -> usize {
        self.device_ids.len()
    }

    /// Physical ids of the devices in the set.
    pub fn device_ids(&self) -> &[usize] {
        &self.device_ids
    }

    pub fn streams_per_device(&self) -> usize {
        self.streams.first().map_or(0, Vec::len)
    }

    /// Stream `index` on `device`.
    pub fn stream(&self, device: usize, index: usize) -> Result<&Stream> {
        self.streams
            .get(device)
            .and_then(|s| s.get(index))
            .ok_or_else(|| {
                Error::configuration(
                    "Backend",
                    format!("no stream {index} on device {device}"),
                )
            })
    }

    /// Synchronize every stream of every device.
    pub fn sync_all(&self) {
        for stream in self.streams.iter().flatten() {
            stream.sync();
        }
    }
}
