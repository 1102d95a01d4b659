use std::{fmt, io};

/// Classification of proxy failures.
///
/// The set is deliberately small: callers branch on the kind, and the
/// human-readable part lives in the message trail of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// A privileged socket operation was denied.
    #[error("bad permissions")]
    BadPermissions,
    /// Missing interface, group or cache entry.
    #[error("does not exist")]
    DoesNotExist,
    /// Group name collision or interface double-bind.
    #[error("already exists")]
    AlreadyExists,
    /// Empty or invalid names, wrong address family.
    #[error("invalid argument")]
    InvalidArgument,
    /// A non-blocking receive with nothing to read.
    #[error("result unavailable")]
    ResultUnavailable,
    /// Truncated or structurally invalid packet.
    #[error("malformed packet")]
    MalformedPacket,
    /// Outbound frame larger than the link MTU.
    #[error("MTU exceeded")]
    MtuExceeded,
    /// Socket already bound to the interface.
    #[error("resource in use")]
    ResourceInUse,
    /// Unknown hardware type or unsupported option shape.
    #[error("unsupported type")]
    UnsupportedType,
    /// Operation on an uninitialized or closed socket.
    #[error("bad internal state")]
    BadInternalState,
    #[error("unexpected failure")]
    UnexpectedFailure,
}

/// An error kind with an appendable message trail.
///
/// Messages added while the error propagates upward are printed in the
/// reverse order of insertion, so the rendering reads from the outermost
/// context down to the original technical detail:
/// `<kind>: <outer>: <inner>`.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    trail: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error {
            kind,
            trail: Vec::new(),
        }
    }

    pub fn with(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error {
            kind,
            trail: vec![message.into()],
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Appends a message to the trail. The newest message renders first.
    #[must_use]
    pub fn context(mut self, message: impl Into<String>) -> Error {
        self.trail.push(message.into());
        self
    }

    /// Maps the current `errno` onto an error kind, keeping the OS error
    /// string in the trail.
    pub fn from_errno(op: &str) -> Error {
        let os = io::Error::last_os_error();
        let kind = match os.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => ErrorKind::BadPermissions,
            Some(libc::ENODEV) | Some(libc::ENXIO) => ErrorKind::DoesNotExist,
            Some(libc::EADDRINUSE) => ErrorKind::ResourceInUse,
            Some(libc::EAGAIN) => ErrorKind::ResultUnavailable,
            _ => ErrorKind::UnexpectedFailure,
        };
        Error::with(kind, format!("{op}: {os}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for message in self.trail.iter().rev() {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Adds trail context to the error arm of a result as it propagates.
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_renders_outermost_first() {
        let err = Error::with(ErrorKind::UnexpectedFailure, "bind(): permission denied")
            .context("failed to initialize ether socket for interface eth0");
        assert_eq!(
            err.to_string(),
            "unexpected failure: failed to initialize ether socket for interface eth0: \
             bind(): permission denied"
        );
    }

    #[test]
    fn bare_kind_renders_alone() {
        assert_eq!(
            Error::new(ErrorKind::ResultUnavailable).to_string(),
            "result unavailable"
        );
    }

    #[test]
    fn result_context_passes_ok_through() {
        let ok: Result<u32> = Ok(7);
        assert_eq!(ok.context("unused").unwrap(), 7);

        let err: Result<u32> = Err(Error::new(ErrorKind::DoesNotExist));
        let err = err.context("no interface found").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoesNotExist);
        assert_eq!(err.to_string(), "does not exist: no interface found");
    }
}
