//! Explicit data-location tags.
//!
//! Predictions and the final loss live on the training device; label decoding
//! and critical detection always run on host memory. Rather than branching on
//! the runtime type of a buffer, every buffer that crosses that boundary is
//! wrapped in [`Located`] and moved with an explicit [`Located::to`] call.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Where a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Accelerator with the given ordinal.
    Cuda(usize),
}

impl Device {
    /// `true` for host memory.
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(i) => write!(f, "cuda:{i}"),
        }
    }
}

/// A value tagged with the device it resides on.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    value: T,
    device: Device,
}

impl<T> Located<T> {
    /// Tag `value` as living on `device`.
    pub fn new(value: T, device: Device) -> Self {
        Located { value, device }
    }

    /// Tag `value` as host memory.
    pub fn host(value: T) -> Self {
        Located::new(value, Device::Cpu)
    }

    /// The device tag.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Borrow the payload.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Unwrap the payload, dropping the tag.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Clone> Located<T> {
    /// Copy the buffer to `device`.
    ///
    /// Always produces a fresh copy, even when the buffer is already on the
    /// target device; transferred buffers are never cached.
    pub fn to(&self, device: Device) -> Located<T> {
        trace!(from = %self.device, to = %device, "transferring buffer");
        Located { value: self.value.clone(), device }
    }

    /// Copy the buffer to host memory.
    pub fn to_host(&self) -> Located<T> {
        self.to(Device::Cpu)
    }
}
