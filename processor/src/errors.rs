use thiserror::Error;

// CPU ERROR
// ================================================================================================

/// Errors reported by the CPU-semantic collaborator.
///
/// These never abort the engine: the exploration loop treats a failed decode or execute like
/// any other stopping rule and the engine instance stays usable.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("no instruction could be decoded at {addr:#x}")]
    InvalidInstruction { addr: u64 },
    #[error("instruction at {addr:#x} is not supported: {reason}")]
    Unsupported { addr: u64, reason: &'static str },
}
