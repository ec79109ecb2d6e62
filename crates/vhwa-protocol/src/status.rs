//! Status codes reported back to the guest through the command header's `rc` field.

use thiserror::Error;

pub const VINF_SUCCESS: i32 = 0;
pub const VERR_GENERAL_FAILURE: i32 = -1;
pub const VERR_INVALID_PARAMETER: i32 = -2;
pub const VERR_INVALID_MAGIC: i32 = -3;
pub const VERR_NO_MEMORY: i32 = -8;
pub const VERR_VERSION_MISMATCH: i32 = -11;
pub const VERR_NOT_IMPLEMENTED: i32 = -12;
pub const VERR_NOT_SUPPORTED: i32 = -37;
pub const VERR_ACCESS_DENIED: i32 = -38;
pub const VERR_INVALID_STATE: i32 = -79;

/// A failed VHWA operation. [`VhwaError::rc`] is the only form the guest ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum VhwaError {
    #[error("general failure")]
    GeneralFailure,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid magic")]
    InvalidMagic,
    #[error("out of memory")]
    NoMemory,
    #[error("version mismatch")]
    VersionMismatch,
    #[error("not implemented")]
    NotImplemented,
    #[error("not supported")]
    NotSupported,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid state")]
    InvalidState,
}

pub type VhwaResult<T> = Result<T, VhwaError>;

impl VhwaError {
    pub const fn rc(self) -> i32 {
        match self {
            Self::GeneralFailure => VERR_GENERAL_FAILURE,
            Self::InvalidParameter => VERR_INVALID_PARAMETER,
            Self::InvalidMagic => VERR_INVALID_MAGIC,
            Self::NoMemory => VERR_NO_MEMORY,
            Self::VersionMismatch => VERR_VERSION_MISMATCH,
            Self::NotImplemented => VERR_NOT_IMPLEMENTED,
            Self::NotSupported => VERR_NOT_SUPPORTED,
            Self::AccessDenied => VERR_ACCESS_DENIED,
            Self::InvalidState => VERR_INVALID_STATE,
        }
    }

    /// Maps a negative status back to an error; unknown failures become
    /// [`VhwaError::GeneralFailure`]. Non-negative values are successes.
    pub const fn from_rc(rc: i32) -> Option<Self> {
        match rc {
            rc if rc >= 0 => None,
            VERR_INVALID_PARAMETER => Some(Self::InvalidParameter),
            VERR_INVALID_MAGIC => Some(Self::InvalidMagic),
            VERR_NO_MEMORY => Some(Self::NoMemory),
            VERR_VERSION_MISMATCH => Some(Self::VersionMismatch),
            VERR_NOT_IMPLEMENTED => Some(Self::NotImplemented),
            VERR_NOT_SUPPORTED => Some(Self::NotSupported),
            VERR_ACCESS_DENIED => Some(Self::AccessDenied),
            VERR_INVALID_STATE => Some(Self::InvalidState),
            _ => Some(Self::GeneralFailure),
        }
    }
}

/// Collapses an operation result into the status written to the guest.
pub fn rc_of<T>(result: &VhwaResult<T>) -> i32 {
    match result {
        Ok(_) => VINF_SUCCESS,
        Err(err) => err.rc(),
    }
}
