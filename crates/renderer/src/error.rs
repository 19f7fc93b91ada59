//! Error taxonomy of the frame engine.

use thiserror::Error;

use umbra_resources::ResourceError;
use umbra_rhi::RhiError;

use crate::frame_sync::FramePhase;
use crate::material::MaterialState;

#[derive(Error, Debug)]
pub enum RenderError {
    /// A uniform write whose length differs from the buffer size.
    #[error("Uniform write of {actual} bytes into a {expected}-byte buffer")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A descriptor set was requested before shadow maps were attached.
    #[error("Descriptor set read while material instance is {state:?}")]
    ReadSetBeforeReady { state: MaterialState },

    #[error("Material instance is {found:?}, operation requires {expected:?}")]
    InvalidMaterialState {
        expected: MaterialState,
        found: MaterialState,
    },

    /// A frame-loop step was called out of order for its slot.
    #[error("Frame slot is {found:?}, operation requires {expected:?}")]
    FrameOutOfOrder {
        expected: FramePhase,
        found: FramePhase,
    },

    #[error("Descriptor capacity was already reserved")]
    CapacityAlreadyReserved,

    #[error("Descriptor set allocated before capacity was reserved")]
    CapacityNotReserved,

    /// Descriptor demand exceeded the reserved pool.
    #[error("Descriptor pool exhausted: {kind} needs {requested}, capacity {capacity}")]
    PoolExhausted {
        kind: &'static str,
        requested: u32,
        capacity: u32,
    },

    /// The presentation surface no longer matches the window.
    #[error("Render surface is out of date")]
    SurfaceStale,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Unknown {0} handle")]
    UnknownHandle(&'static str),

    #[error("{0} called before the engine was initialized")]
    NotInitialized(&'static str),

    #[error("Unknown base material '{0}'")]
    UnknownBaseMaterial(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] umbra_core::Error),

    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl RenderError {
    /// Recoverable by rebuilding extent-sized resources and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::SurfaceStale)
    }

    /// Caller bugs: the engine refuses the operation instead of touching GPU memory.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RenderError::SizeMismatch { .. }
                | RenderError::ReadSetBeforeReady { .. }
                | RenderError::InvalidMaterialState { .. }
                | RenderError::FrameOutOfOrder { .. }
                | RenderError::CapacityAlreadyReserved
                | RenderError::CapacityNotReserved
        )
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stale_surfaces_are_recoverable() {
        assert!(RenderError::SurfaceStale.is_recoverable());
        assert!(!RenderError::Timeout("fence").is_recoverable());
        assert!(
            !RenderError::PoolExhausted {
                kind: "descriptor sets",
                requested: 1,
                capacity: 0
            }
            .is_recoverable()
        );
    }

    #[test]
    fn contract_violations() {
        assert!(
            RenderError::SizeMismatch {
                expected: 192,
                actual: 64
            }
            .is_contract_violation()
        );
        assert!(
            RenderError::ReadSetBeforeReady {
                state: MaterialState::SetsWritten
            }
            .is_contract_violation()
        );
        assert!(!RenderError::SurfaceStale.is_contract_violation());
        assert!(!RenderError::UnknownBaseMaterial("lit".into()).is_contract_violation());
    }
}
