//! Error taxonomy shared by every layer of the store.

use std::io;

use onlyerror::Error;

pub type VfsResult<T> = Result<T, VfsError>;

#[derive(Debug, Error)]
pub enum VfsError {
    /// The entity is absent from the KV store.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("write attempted on read-only session: {0}")]
    ReadOnlyViolation(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("kv backend failure")]
    Backend(#[from] jammdb::Error),
    #[error("entity codec failure")]
    Codec(#[from] serde_json::Error),
    #[error("i/o failure")]
    Io(#[from] io::Error),
}

/// The four outcomes callers are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    ReadOnlyViolation,
    StorageFailure,
}

impl VfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            VfsError::ReadOnlyViolation(_) => ErrorKind::ReadOnlyViolation,
            VfsError::StorageFailure(_)
            | VfsError::Backend(_)
            | VfsError::Codec(_)
            | VfsError::Io(_) => {
                ErrorKind::StorageFailure
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        VfsError::InvalidArgument(msg.into())
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        if let VfsError::Io(inner) = e {
            return inner;
        }
        let kind = match e.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::ReadOnlyViolation => io::ErrorKind::PermissionDenied,
            ErrorKind::StorageFailure => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(VfsError::NotFound("/a".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            VfsError::StorageFailure("disk".into()).kind(),
            ErrorKind::StorageFailure
        );
        let codec = serde_json::from_slice::<u32>(b"nope").unwrap_err();
        assert_eq!(VfsError::from(codec).kind(), ErrorKind::StorageFailure);
    }

    #[test]
    fn test_io_translation() {
        let e: io::Error = VfsError::ReadOnlyViolation("/f".into()).into();
        assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
        let e: io::Error = VfsError::invalid("negative seek").into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    }
}
