//! Accelerator device identity

use std::fmt;

use serde::Deserialize;

/// Opaque accelerator device number.
///
/// Every operation of the selector and the device context binds the calling
/// thread to this device before touching any device resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub usize);

impl DeviceId {
    /// Device ordinal as understood by the driver
    #[must_use]
    pub const fn ordinal(self) -> usize {
        self.0
    }
}

impl From<usize> for DeviceId {
    fn from(ordinal: usize) -> Self {
        Self(ordinal)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId(0).to_string(), "gpu0");
        assert_eq!(DeviceId::from(3).to_string(), "gpu3");
    }

    #[test]
    fn test_device_id_deserializes_from_number() {
        let id: DeviceId = serde_json::from_str("2").unwrap();
        assert_eq!(id.ordinal(), 2);
    }
}
