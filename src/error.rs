//! Command failure taxonomy

use thiserror::Error;

use crate::driver::DriverError;
use crate::lookup::DeviceTypeCode;

/// Why a hub query or command could not be carried out
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// No live session for the requested identifier
    #[error("Hub {0} is not connected")]
    HubNotConnected(String),

    /// The port's live device type cannot execute the command
    #[error("No motor found on port {port} (found {device})")]
    IncompatibleDevice { port: String, device: DeviceTypeCode },

    /// Color name is not in the color table
    #[error("Unknown color: {0}")]
    InvalidColor(String),

    /// The driver rejected or failed the underlying hardware call
    #[error("Driver failure: {0}")]
    DriverFailure(#[from] DriverError),
}
