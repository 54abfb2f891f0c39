//! Hub driver boundary and the in-process simulated driver

pub mod sim;
pub mod traits;

pub use sim::{SimCommand, SimulatedDriver, SimulatedHub};
pub use traits::{
    DiscoveredHub, DriverError, DriverEvent, HubDevice, HubDriver, HubEvent, SensorCategory,
    SensorEvent, Telemetry,
};
