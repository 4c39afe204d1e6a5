pub mod compat;
pub mod config;
pub mod device;
pub mod error;
pub mod idgen;
pub mod io;
pub mod notification;
pub mod session;

// Re-export the device entry points for convenience
pub use device::{Device, DeviceStats, OpenOptions};

// Re-export configuration and error types
pub use config::{ConfigError, DeviceConfig};
pub use error::{Error, Result};

// Re-export id types
pub use idgen::{IdGen, ListenerId, SessionId};

// Re-export storage types
pub use io::{BufferStore, SharedStore, WriteReport};

// Re-export notification types
pub use notification::{NotificationRegistry, Signal, WaitOutcome};

// Re-export session types
pub use session::{
    AccessMode, ControlCommand, ControlReply, Interest, Interrupter, Session, Whence,
    CONTROL_CLEAR, CONTROL_SUBSCRIBE, CONTROL_UNSUBSCRIBE,
};
