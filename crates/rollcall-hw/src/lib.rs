//! rollcall-hw: Hardware abstraction for colour camera capture.
//!
//! Provides V4L2-based camera access and RGB frame conversion.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
