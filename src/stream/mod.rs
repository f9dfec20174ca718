//! Audio stream layer
//!
//! - Configuration types shared with the host ([`spec`])
//! - The provider interface activities are written against ([`provider`])
//! - A cpal-backed provider for real devices ([`cpal`])
//! - An in-memory loopback provider for hardware-free self-tests
//!   ([`loopback`])

pub mod cpal;
pub mod loopback;
pub mod provider;
pub mod spec;
