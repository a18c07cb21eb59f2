// ============================================================================
// ERROR TAXONOMY
// ============================================================================

use thiserror::Error;

pub type TexResult<T> = Result<T, TexError>;

/// Errors surfaced by the GPU compute core.
///
/// Contract violations (index out of range, mismatched dimensionality between
/// a source and destination texture) are assertions, not error values. These
/// variants cover the failures a correct caller can still run into: no usable
/// adapter, device limits, unsupported format requests, shader synthesis
/// producing invalid WGSL, and readback plumbing.
#[derive(Debug, Error)]
pub enum TexError {
    #[error("no gpu adapter available")]
    NoAdapter,

    #[error("gpu device request failed: {0}")]
    DeviceRequest(String),

    /// A synthesized shader failed WGSL validation. Carries the full
    /// line-numbered source so the offending spliced fragment can be located.
    #[error("shader '{name}' failed to compile: {message}\n{source_listing}")]
    ShaderCompile {
        name: String,
        message: String,
        source_listing: String,
    },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A requested resource exceeds what the device supports. `limit` is the
    /// maximum the device allows, so callers can retry smaller.
    #[error("{what} ({requested}) exceeds device limit ({limit})")]
    ResourceLimit {
        what: &'static str,
        requested: u64,
        limit: u64,
    },

    #[error("gpu readback failed: {0}")]
    Readback(String),
}

impl TexError {
    pub(crate) fn shader_compile(name: &str, message: &str, source: &str) -> Self {
        TexError::ShaderCompile {
            name: name.to_string(),
            message: message.to_string(),
            source_listing: number_lines(source),
        }
    }

    pub(crate) fn resource_limit(what: &'static str, requested: u64, limit: u64) -> Self {
        TexError::ResourceLimit {
            what,
            requested,
            limit,
        }
    }
}

/// Prefix every line with a 1-based line number, matching the numbering in
/// WGSL validation messages.
fn number_lines(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.len() / 8);
    for (i, line) in source.lines().enumerate() {
        out.push_str(&format!("{:4}: {line}\n", i + 1));
    }
    out
}
