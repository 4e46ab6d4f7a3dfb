use std::io;

use nix::errno::Errno;

/// The error type for socket supervision operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error occurred during system call
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Platform-specific system call failed
    #[error("System call '{operation}' failed with code {code} ({text})")]
    SystemCall {
        operation: String,
        code: i32,
        text: String,
    },

    /// Socket or manager configuration rejected
    #[error("Configuration error: {details}")]
    Config { details: String },

    /// A bounded registry has no free slot left
    #[error("Registry '{registry}' is full (capacity {capacity})")]
    RegistryFull {
        registry: &'static str,
        capacity: usize,
    },

    /// A socket with the same name is already running
    #[error("Socket '{name}' is already registered")]
    DuplicateName { name: String },

    /// Network interface not found
    #[error("Network interface '{name}' not found")]
    InterfaceNotFound { name: String },
}

impl Error {
    /// Create a new system call error from an I/O error
    pub fn system_call(operation: impl Into<String>, err: &io::Error) -> Self {
        Self::SystemCall {
            operation: operation.into(),
            code: err.raw_os_error().unwrap_or(-1),
            text: err.to_string(),
        }
    }

    /// Create a new system call error from a `nix` errno
    pub fn from_errno(operation: impl Into<String>, err: Errno) -> Self {
        Self::system_call(operation, &io::Error::from(err))
    }

    /// Create a new configuration error
    pub fn config_error(details: impl Into<String>) -> Self {
        Self::Config {
            details: details.into(),
        }
    }

    /// Create a new registry full error
    pub const fn registry_full(registry: &'static str, capacity: usize) -> Self {
        Self::RegistryFull { registry, capacity }
    }

    /// Create a new duplicate name error
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create a new interface not found error
    pub fn interface_not_found(name: impl Into<String>) -> Self {
        Self::InterfaceNotFound { name: name.into() }
    }
}

/// A specialized `Result` type for socket supervision operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Render an I/O error the way log lines report it: `errno N (text)`.
pub(crate) fn errno_text(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => format!("errno {code} ({err})"),
        None => format!("errno - ({err})"),
    }
}
