//! Optional platform capability probes
//!
//! Some platforms can report whether a stream uses a memory-mapped fast
//! path, exposed through an optional symbol that may be missing entirely.
//! The probe is resolved once at startup and injected; call sites only ever
//! see a supported/unsupported outcome. An unavailable probe is "capability
//! unknown", never an error.

use crate::stream::provider::ProviderStream;

/// Probe for the memory-mapped fast-path capability of an open stream.
pub trait MmapProbe {
    /// `Some(used)` when the platform exposes the query for this stream;
    /// `None` when the capability cannot be determined.
    fn is_mmap_used(&self, stream: &dyn ProviderStream) -> Option<bool>;
}

/// Probe used when the platform symbol is unavailable. Always reports
/// "unknown", which diagnostics surface as the conservative `false`.
pub struct UnsupportedMmapProbe;

impl MmapProbe for UnsupportedMmapProbe {
    fn is_mmap_used(&self, _stream: &dyn ProviderStream) -> Option<bool> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::loopback::{LoopbackOptions, LoopbackProvider};
    use crate::stream::provider::StreamProvider;
    use crate::stream::spec::{Direction, StreamSpec};

    #[test]
    fn test_unsupported_probe_reports_unknown() {
        let provider = LoopbackProvider::new(LoopbackOptions::default());
        let config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Output))
            .unwrap();
        let stream = provider
            .open_output(&config, Box::new(|_: &mut [f32]| {}))
            .unwrap();

        let probe = UnsupportedMmapProbe;
        assert_eq!(probe.is_mmap_used(stream.as_ref()), None);
    }
}
