use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use blockspace_common::Error;

/// How a Container's body is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionKind {
    /// Uniform per-cell kernel, portable across host and accelerator.
    Device,
    /// Wraps a batched routine that manages its own launch.
    DeviceManaged,
    /// Carries a device path and a host path; the owning device kind picks one.
    DeviceThenHostManaged,
    /// Host-only orchestration.
    HostManaged,
    /// No body. An ordering point that is never dispatched.
    None,
}

impl ExecutionKind {
    pub const ALL: [ExecutionKind; 5] = [
        ExecutionKind::Device,
        ExecutionKind::DeviceManaged,
        ExecutionKind::DeviceThenHostManaged,
        ExecutionKind::HostManaged,
        ExecutionKind::None,
    ];

    /// Whether the Container can be split into per-view work (internal and
    /// boundary) by a scheduler.
    pub fn is_expandable(self) -> bool {
        matches!(self, ExecutionKind::Device)
    }

    pub fn is_dispatchable(self) -> bool {
        self != ExecutionKind::None
    }

    fn as_str(self) -> &'static str {
        match self {
            ExecutionKind::Device => "device",
            ExecutionKind::DeviceManaged => "deviceManaged",
            ExecutionKind::DeviceThenHostManaged => "deviceThenHostManaged",
            ExecutionKind::HostManaged => "hostManaged",
            ExecutionKind::None => "none",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                Error::configuration("ExecutionKind", format!("unknown execution kind `{s}`"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        for kind in ExecutionKind::ALL {
            assert_eq!(kind.to_string().parse::<ExecutionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_string_rejected() {
        assert!("graph".parse::<ExecutionKind>().is_err());
    }

    #[test]
    fn only_device_is_expandable() {
        let expandable: Vec<_> = ExecutionKind::ALL
            .into_iter()
            .filter(|k| k.is_expandable())
            .collect();
        assert_eq!(expandable, vec![ExecutionKind::Device]);
        assert!(!ExecutionKind::None.is_dispatchable());
    }
}
