//! Device types, compilation targets and device-to-target resolution.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{LowerError, LowerResult};

/// Integer device code following the DLPack numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceType(pub i32);

impl DeviceType {
    pub const UNKNOWN: DeviceType = DeviceType(0);
    pub const CPU: DeviceType = DeviceType(1);
    pub const CUDA: DeviceType = DeviceType(2);
    pub const CUDA_HOST: DeviceType = DeviceType(3);
    pub const OPENCL: DeviceType = DeviceType(4);
    pub const VULKAN: DeviceType = DeviceType(7);
    pub const METAL: DeviceType = DeviceType(8);
    pub const VPI: DeviceType = DeviceType(9);
    pub const ROCM: DeviceType = DeviceType(10);
    pub const EXT_DEV: DeviceType = DeviceType(12);
    pub const WEBGPU: DeviceType = DeviceType(15);
    pub const HEXAGON: DeviceType = DeviceType(16);

    pub fn name(self) -> &'static str {
        match self {
            DeviceType::CPU => "cpu",
            DeviceType::CUDA => "cuda",
            DeviceType::CUDA_HOST => "cuda_host",
            DeviceType::OPENCL => "opencl",
            DeviceType::VULKAN => "vulkan",
            DeviceType::METAL => "metal",
            DeviceType::VPI => "vpi",
            DeviceType::ROCM => "rocm",
            DeviceType::EXT_DEV => "ext_dev",
            DeviceType::WEBGPU => "webgpu",
            DeviceType::HEXAGON => "hexagon",
            _ => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// A device/toolchain configuration such as `llvm -mcpu=cortex-m55`.
///
/// Targets are identified by their canonical string: the kind followed by the
/// options in sorted order. Equality, hashing and ordering all use it.
#[derive(Clone)]
pub struct Target {
    kind: Arc<str>,
    options: Arc<BTreeMap<String, String>>,
    canonical: Arc<str>,
}

impl Target {
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_options(kind, BTreeMap::new())
    }

    pub fn with_options(kind: impl Into<String>, options: BTreeMap<String, String>) -> Self {
        let kind = kind.into();
        let mut canonical = kind.clone();
        for (key, value) in &options {
            canonical.push_str(&format!(" -{key}={value}"));
        }
        Self {
            kind: Arc::from(kind),
            options: Arc::new(options),
            canonical: Arc::from(canonical),
        }
    }

    /// Parses `"kind -key=value -flag"`; bare flags are recorded as `true`.
    pub fn parse(spec: &str) -> Self {
        let mut parts = spec.split_whitespace();
        let kind = parts.next().unwrap_or("unknown").to_string();
        let mut options = BTreeMap::new();
        for part in parts {
            let trimmed = part.trim_start_matches('-');
            match trimmed.split_once('=') {
                Some((key, value)) => options.insert(key.to_string(), value.to_string()),
                None => options.insert(trimmed.to_string(), "true".to_string()),
            };
        }
        Self::with_options(kind, options)
    }

    /// The pseudo-target assigned to functions compiled by external toolchains.
    pub fn ext_dev() -> Self {
        Self::new("ext_dev")
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn device_type(&self) -> DeviceType {
        match self.kind() {
            "llvm" | "c" | "stackvm" => DeviceType::CPU,
            "cuda" | "nvptx" => DeviceType::CUDA,
            "opencl" => DeviceType::OPENCL,
            "vulkan" => DeviceType::VULKAN,
            "metal" => DeviceType::METAL,
            "rocm" => DeviceType::ROCM,
            "ext_dev" => DeviceType::EXT_DEV,
            "webgpu" => DeviceType::WEBGPU,
            "hexagon" => DeviceType::HEXAGON,
            _ => DeviceType::UNKNOWN,
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", self.canonical)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let spec = String::deserialize(deserializer)?;
        Ok(Target::parse(&spec))
    }
}

/// Device placement annotation: a device type plus, once known, its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualDevice {
    pub device_type: DeviceType,
    pub target: Option<Target>,
}

impl VirtualDevice {
    pub fn new(target: Target) -> Self {
        Self {
            device_type: target.device_type(),
            target: Some(target),
        }
    }

    pub fn unconstrained(device_type: DeviceType) -> Self {
        Self {
            device_type,
            target: None,
        }
    }
}

impl fmt::Display for VirtualDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}:{}", self.device_type.name(), target),
            None => f.write_str(self.device_type.name()),
        }
    }
}

/// Targets configured by the driver, keyed by device type.
pub type TargetMap = BTreeMap<DeviceType, Target>;

/// Resolves the target for `device_type`.
///
/// With exactly one registered target the device type is ignored and that
/// target is returned, even for device type zero.
pub fn get_target_from_device_type(
    device_type: DeviceType,
    targets: &TargetMap,
) -> LowerResult<Target> {
    if targets.len() == 1 {
        if let Some(target) = targets.values().next() {
            return Ok(target.clone());
        }
    }

    targets.get(&device_type).cloned().ok_or_else(|| {
        let device = if device_type == DeviceType::UNKNOWN {
            "unknown"
        } else {
            device_type.name()
        };
        let available = targets
            .iter()
            .map(|(device, target)| format!("{} -> {}", device.0, target))
            .collect::<Vec<_>>()
            .join(", ");
        LowerError::UnknownDeviceType {
            device: device.to_string(),
            code: device_type.0,
            available,
        }
    })
}
