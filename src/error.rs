//! Error type for device hierarchy and link operations.

use core::fmt;

use axerrno::AxError;

/// Errors reported by the device core.
///
/// All of these are recoverable by the caller. Developer errors (broken link
/// state invariants, reference count underflow) are not reported here; they go
/// through the assertion policy instead (see [`AssertPolicy`](crate::AssertPolicy)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevError {
    /// Unknown device handle, self-referential link or invalid flag combination.
    InvalidArgument,
    /// The requested link would make a device depend on itself.
    CycleDetected,
    /// The supplier has not been added to the hierarchy yet.
    SupplierNotReady,
    /// Not a failure: a supplier is not available yet, retry later.
    Defer,
    /// A link object could not be allocated.
    AllocationFailure,
    /// The operation requires a registered device.
    NoDevice,
    /// The driver's probe callback failed.
    Driver(AxError),
}

/// A specialized [`Result`] type with [`DevError`] as the error type.
pub type DevResult<T = ()> = Result<T, DevError>;

impl fmt::Display for DevError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::CycleDetected => f.write_str("link would create a dependency cycle"),
            Self::SupplierNotReady => f.write_str("supplier device is not added"),
            Self::Defer => f.write_str("probe deferred"),
            Self::AllocationFailure => f.write_str("link allocation failed"),
            Self::NoDevice => f.write_str("device is not registered"),
            Self::Driver(err) => write!(f, "driver probe failed: {err:?}"),
        }
    }
}

impl From<DevError> for AxError {
    fn from(err: DevError) -> Self {
        match err {
            DevError::InvalidArgument | DevError::CycleDetected => AxError::InvalidInput,
            DevError::SupplierNotReady => AxError::BadState,
            DevError::Defer => AxError::WouldBlock,
            DevError::AllocationFailure => AxError::NoMemory,
            DevError::NoDevice => AxError::NotFound,
            DevError::Driver(err) => err,
        }
    }
}

/// Logs the error at `warn` level and returns it, like `axerrno::ax_err!`.
macro_rules! dev_err {
    ($err:ident) => {{
        warn!("[DevError::{}]", stringify!($err));
        Err($crate::error::DevError::$err)
    }};
    ($err:ident, $($arg:tt)+) => {{
        warn!("[DevError::{}] {}", stringify!($err), format_args!($($arg)+));
        Err($crate::error::DevError::$err)
    }};
}
