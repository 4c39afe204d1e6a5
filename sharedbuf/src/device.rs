//! Device - the one shared buffer and the sessions opened on it
//!
//! A `Device` is a cheap handle (`Arc`) to the process-wide state: the buffer
//! store behind its reader/writer lock, the notification registry, the
//! immutable configuration and a few counters. Every session holds a clone.
//!
//! # Example
//!
//! ```
//! use sharedbuf::{Device, DeviceConfig, OpenOptions};
//!
//! let device = Device::new(DeviceConfig::default()).unwrap();
//!
//! let mut writer = device.open(OpenOptions::new().write(true)).unwrap();
//! writer.write(b"foo").unwrap();
//!
//! let mut appender = device.open(OpenOptions::new().append(true)).unwrap();
//! appender.write(b"bar").unwrap();
//!
//! let mut reader = device.open(OpenOptions::new().read(true)).unwrap();
//! let mut buf = [0u8; 16];
//! let n = reader.read(&mut buf).unwrap();
//! assert_eq!(&buf[..n], b"foobar");
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ConfigError, DeviceConfig};
use crate::error::{Error, Result};
use crate::idgen::IdGen;
use crate::io::{BufferStore, SharedStore};
use crate::notification::NotificationRegistry;
use crate::session::{AccessMode, Session};

pub const O_ACCMODE: i32 = 0o3;
pub const O_RDONLY: i32 = 0o0;
pub const O_WRONLY: i32 = 0o1;
pub const O_RDWR: i32 = 0o2;
pub const O_TRUNC: i32 = 0o1000;
pub const O_APPEND: i32 = 0o2000;

/// How to open a session, in the manner of `std::fs::OpenOptions`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    /// Decoded from POSIX flags: append does not grant write access and
    /// truncate needs no particular access
    raw_flags: bool,
}

impl OpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    /// Writes go to the current end of the buffer. Implies write access.
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    /// Empty the shared buffer when opening. Requires write access.
    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    /// Decode POSIX open flags. Flags other than the access mode, `O_APPEND`
    /// and `O_TRUNC` are ignored.
    ///
    /// Unlike the builder, the access mode comes from the access bits alone:
    /// `O_RDONLY | O_APPEND` stays read-only, and `O_TRUNC` empties the buffer
    /// whatever the access mode.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the access mode bits are not one of
    /// `O_RDONLY`, `O_WRONLY`, `O_RDWR`.
    pub fn from_flags(flags: i32) -> Result<Self> {
        let (read, write) = match flags & O_ACCMODE {
            O_RDONLY => (true, false),
            O_WRONLY => (false, true),
            O_RDWR => (true, true),
            _ => return Err(Error::InvalidArgument("unknown access mode in open flags")),
        };
        Ok(Self {
            read,
            write,
            append: flags & O_APPEND != 0,
            truncate: flags & O_TRUNC != 0,
            raw_flags: true,
        })
    }

    fn access_mode(&self) -> Result<AccessMode> {
        let write = self.write || (self.append && !self.raw_flags);
        let mode = match (self.read, write) {
            (true, false) => AccessMode::ReadOnly,
            (false, true) => AccessMode::WriteOnly,
            (true, true) => AccessMode::ReadWrite,
            (false, false) => {
                return Err(Error::InvalidArgument("open requires read or write access"))
            }
        };
        if self.truncate && !write && !self.raw_flags {
            return Err(Error::InvalidArgument("truncate requires write access"));
        }
        Ok(mode)
    }
}

/// Point-in-time view of the device, for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub size: usize,
    pub capacity: usize,
    pub max_capacity: usize,
    /// Read requests with a non-empty buffer, including reads at end of data
    pub read_count: u64,
    /// Write operations that committed data
    pub write_count: u64,
    pub open_sessions: usize,
    pub listeners: usize,
}

struct DeviceInner {
    config: DeviceConfig,
    store: SharedStore,
    registry: NotificationRegistry,
    ids: IdGen,
    read_count: AtomicU64,
    write_count: AtomicU64,
    shut_down: AtomicBool,
}

/// Handle to the shared buffer device. Clones refer to the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Validate `config` and allocate the initial storage.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` for a bad configuration, `ConfigError::Storage`
    /// if the initial allocation fails.
    pub fn new(config: DeviceConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let store = BufferStore::new(config.initial_capacity, config.max_capacity)?;
        info!(
            max_capacity = config.max_capacity,
            initial_capacity = config.initial_capacity,
            "shared buffer device started"
        );
        Ok(Self {
            inner: Arc::new(DeviceInner {
                registry: NotificationRegistry::new(config.listener_channel_capacity),
                store: SharedStore::new(store),
                config,
                ids: IdGen::new(),
                read_count: AtomicU64::new(0),
                write_count: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Open a new session with its cursor at zero.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for inconsistent options, `BadDescriptor` once the
    /// device is shut down.
    pub fn open(&self, options: &OpenOptions) -> Result<Session> {
        let access = options.access_mode()?;
        if self.is_shut_down() {
            return Err(Error::BadDescriptor("device is shut down"));
        }

        let id = self.inner.ids.next_session();
        self.inner.registry.register_session(id)?;

        if options.truncate {
            self.inner.store.write().truncate_on_open();
        }

        debug!(%id, ?access, append = options.append, truncate = options.truncate, "session opened");
        Ok(Session::new(id, access, options.append, self.clone()))
    }

    /// The configuration the device was started with
    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.inner.config.max_capacity
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        let (size, capacity, max_capacity) = {
            let store = self.inner.store.read();
            (store.size(), store.capacity(), store.max_capacity())
        };
        DeviceStats {
            size,
            capacity,
            max_capacity,
            read_count: self.inner.read_count.load(Ordering::Relaxed),
            write_count: self.inner.write_count.load(Ordering::Relaxed),
            open_sessions: self.inner.registry.open_session_count(),
            listeners: self.inner.registry.listener_count(),
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Hang up every waiter and listener and release the storage.
    ///
    /// Sessions that are still open keep working only as far as closing
    /// them; every other operation reports `BadDescriptor`.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            warn!("device shutdown requested twice");
            return;
        }
        self.inner.registry.hangup();
        self.inner.store.write().release();
        info!("shared buffer device shut down");
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub(crate) fn registry(&self) -> &NotificationRegistry {
        &self.inner.registry
    }

    pub(crate) fn count_read(&self) {
        self.inner.read_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_write(&self) {
        self.inner.write_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Device(store={:?}, shut_down={})",
            self.inner.store,
            self.is_shut_down()
        )
    }
}
