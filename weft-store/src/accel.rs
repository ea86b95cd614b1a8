//! Pluggable accelerated-popcount modules.
//!
//! A module exposes a growable linear memory (64 KiB pages) and a
//! Hamming-distance function exported under one of a small set of
//! accepted names. The store copies both packed vectors into the module's
//! memory and invokes the export; any failure to locate or call the
//! export downgrades the session to the table-driven fallback for good.

use std::fmt;

/// Linear-memory page size modules grow by.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Export names probed, in order, when a module is enabled.
pub const HAMMING_EXPORTS: [&str; 4] = [
    "hamming",
    "hamming_distance",
    "hammingDistance",
    "popcount_xor",
];

/// An error raised by a popcount module.
#[derive(Debug)]
pub struct AccelError(pub String);

impl fmt::Display for AccelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accel module error: {}", self.0)
    }
}

impl std::error::Error for AccelError {}

/// The accelerated-popcount module ABI.
///
/// Implementations own a linear byte memory. Callers grow it to at least
/// `offset_b + byte_len` before invoking the export with
/// `(offset_a, offset_b, byte_len)`; the export returns the Hamming
/// distance of the two byte ranges as an `i32`.
pub trait PopcountModule: Send {
    /// Whether the module exports a function under `name`.
    fn has_export(&self, name: &str) -> bool;

    /// Current linear memory size in bytes.
    fn memory_len(&self) -> usize;

    /// Grow linear memory by `pages` 64 KiB pages.
    fn grow(&mut self, pages: usize) -> Result<(), AccelError>;

    /// Copy `bytes` into linear memory at `offset`.
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), AccelError>;

    /// Invoke the named export.
    fn call(&mut self, export: &str, offset_a: i32, offset_b: i32, byte_len: i32)
        -> Result<i32, AccelError>;
}

/// Resolved accelerated path, or the reason there isn't one.
pub(crate) enum AccelState {
    /// No module was ever supplied.
    Disabled,
    /// A module is loaded and its export resolved.
    Ready {
        module: Box<dyn PopcountModule>,
        export: &'static str,
    },
    /// Loading or calling failed once; fallback is permanent for the
    /// session.
    Failed,
}

impl AccelState {
    /// Probe a module for a usable export. A miss is tolerated: the
    /// caller logs and the state records the permanent fallback.
    pub(crate) fn resolve(module: Box<dyn PopcountModule>) -> Self {
        match HAMMING_EXPORTS.iter().find(|name| module.has_export(name)) {
            Some(export) => AccelState::Ready { module, export },
            None => {
                tracing::warn!(
                    probed = ?HAMMING_EXPORTS,
                    "accel module exports none of the accepted hamming entry points; \
                     using table fallback for this session"
                );
                AccelState::Failed
            }
        }
    }

    /// Compute the Hamming distance of two packed vectors through the
    /// module. Returns `None` (after flipping to `Failed`) when the
    /// module path breaks, so the caller can fall back.
    pub(crate) fn hamming(&mut self, a: &[u8], b: &[u8]) -> Option<u32> {
        let AccelState::Ready { module, export } = self else {
            return None;
        };

        let needed = a.len() + b.len();
        if module.memory_len() < needed {
            let deficit = needed - module.memory_len();
            let pages = deficit.div_ceil(PAGE_SIZE);
            if let Err(e) = module.grow(pages) {
                tracing::warn!(error = %e, "accel memory grow failed; using table fallback");
                *self = AccelState::Failed;
                return None;
            }
        }

        let offset_b = a.len();
        let result = module
            .write(0, a)
            .and_then(|_| module.write(offset_b, b))
            .and_then(|_| module.call(export, 0, offset_b as i32, b.len() as i32));

        match result {
            Ok(distance) => Some(distance as u32),
            Err(e) => {
                tracing::warn!(error = %e, "accel call failed; using table fallback");
                *self = AccelState::Failed;
                None
            }
        }
    }
}
