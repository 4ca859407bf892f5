//! Object model errors

use thiserror::Error;

/// Errors raised by the CRD types and the object model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrdError {
    /// Object metadata has no name
    #[error("object is missing metadata.name")]
    MissingName,

    /// Identity string is not of the form `namespace/name`
    #[error("invalid resource identity: {0}")]
    InvalidIdentity(String),

    /// Spec failed validation
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Kind has no group/version registered
    #[error("no group/version registered for kind {0}")]
    UnknownKind(String),
}
