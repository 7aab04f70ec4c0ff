//! The crate-wide error taxonomy (spec §7).
//!
//! Every fallible operation in this crate returns an [`NczError`] variant
//! rather than unwinding; no variant carries a backtrace, matching the
//! "no stacktrace leakage" requirement.

use thiserror::Error;

pub type NczResult<T> = Result<T, NczError>;

#[derive(Error, Debug)]
pub enum NczError {
    /// Metadata is absent or malformed where a Zarr/NCZarr document was expected.
    #[error("not a zarr/nczarr dataset: {0}")]
    NotZarr(String),

    /// A map key that should exist does not.
    #[error("object not found: {0}")]
    EmptyObject(String),

    /// An atomic/complex type is invalid or unsupported in context.
    #[error("bad type: {0}")]
    BadType(String),

    /// An object name violates netCDF naming rules.
    #[error("bad name: {0}")]
    BadName(String),

    /// A dimension reference does not resolve, or its length is inconsistent.
    #[error("bad dimension: {0}")]
    BadDim(String),

    /// An object of that name already exists in this namespace.
    #[error("name already in use: {0}")]
    NameInUse(String),

    /// Attempted to mutate a read-only dataset.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A define-mode-only operation was attempted outside define mode.
    #[error("not in define mode: {0}")]
    NotInDefine(String),

    /// A filter/codec could not be applied (bad parameters, or no matching plugin in strict mode).
    #[error("filter error: {0}")]
    Filter(String),

    /// A numeric conversion would overflow the target type.
    #[error("range error: {0}")]
    Range(String),

    /// The classic netCDF-3 data model rejects the attempted type.
    #[error("rejected by strict netCDF-3 model: {0}")]
    StrictNc3(String),

    /// `_FillValue` was set after data had already been written.
    #[error("fill value set too late: {0}")]
    LateFill(String),

    /// FQN or ordinal lookup failed to find the named object.
    #[error("no such object: {0}")]
    NoSuchObject(String),

    /// An invariant the crate itself is responsible for was violated.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "http")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl NczError {
    /// True for the subset of errors that a caller may recover from locally
    /// (spec §7 "Recoverable locally").
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NczError::EmptyObject(_) | NczError::Filter(_))
    }
}
