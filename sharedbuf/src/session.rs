//! Session - one open handle on the shared buffer
//!
//! Each session has a private cursor and access mode; all sessions of a
//! device read and write the same buffer.
//!
//! # Thread Safety
//!
//! - **Shared buffer**: reads take the store's shared lock, so reads from
//!   different sessions run in parallel. Writes, including growth, take the
//!   exclusive lock for their whole duration.
//! - **Private cursor**: the cursor needs no locking. Methods that move it
//!   take `&mut self`, so one session is used by one thread at a time.
//! - **Waiting**: [`Session::wait_readable`] parks without holding the store
//!   lock. Another thread can abandon the wait through an [`Interrupter`].

use std::io::{IoSlice, IoSliceMut};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::idgen::{ListenerId, SessionId};
use crate::notification::{Signal, WaitOutcome};

/// Control command code space, shared with the ioctl numbering
pub const CONTROL_MAGIC: u32 = b'C' as u32;
/// Empty the buffer
pub const CONTROL_CLEAR: u32 = (CONTROL_MAGIC << 8) | 1;
/// Register the listener id passed as argument
pub const CONTROL_SUBSCRIBE: u32 = (CONTROL_MAGIC << 8) | 2;
/// Remove the listener id passed as argument
pub const CONTROL_UNSUBSCRIBE: u32 = (CONTROL_MAGIC << 8) | 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    #[must_use]
    pub fn can_read(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// Reference point for [`Session::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute offset
    Set,
    /// Relative to the current cursor
    Cur,
    /// Relative to the end of data; always rejected
    End,
}

impl TryFrom<i32> for Whence {
    type Error = Error;

    /// Decode `SEEK_SET` (0), `SEEK_CUR` (1) and `SEEK_END` (2)
    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            _ => Err(Error::InvalidArgument("unknown seek reference point")),
        }
    }
}

/// Readiness a caller can poll for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Decoded control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Clear,
    Subscribe(ListenerId),
    Unsubscribe(ListenerId),
}

impl ControlCommand {
    /// Decode a command code and its argument.
    ///
    /// The code is checked first: an unknown code is `Unsupported` whatever
    /// the argument, while a known code with a malformed argument is
    /// `InvalidArgument`. `Clear` ignores its argument.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn decode(code: u32, arg: u64) -> Result<Self> {
        match code {
            CONTROL_CLEAR => Ok(Self::Clear),
            CONTROL_SUBSCRIBE => Ok(Self::Subscribe(listener_arg(arg)?)),
            CONTROL_UNSUBSCRIBE => Ok(Self::Unsubscribe(listener_arg(arg)?)),
            _ => Err(Error::Unsupported(code)),
        }
    }
}

fn listener_arg(arg: u64) -> Result<ListenerId> {
    if arg == 0 {
        return Err(Error::InvalidArgument("listener id must be non-zero"));
    }
    Ok(ListenerId::new(arg))
}

/// Result of a successful control request
#[derive(Debug)]
pub enum ControlReply {
    Done,
    /// Receiver for the newly registered listener
    Subscribed(broadcast::Receiver<Signal>),
}

/// Abandons a session's blocking wait from another thread
#[derive(Debug, Clone)]
pub struct Interrupter {
    session: SessionId,
    device: Device,
}

impl Interrupter {
    /// Make the session's pending wait (or its next one) return
    /// `WaitOutcome::Interrupted`. Returns `false` if the session is closed.
    pub fn interrupt(&self) -> bool {
        self.device.registry().interrupt(self.session)
    }
}

/// One open handle with a private cursor
pub struct Session {
    id: SessionId,
    access: AccessMode,
    append: bool,
    /// Never above `i64::MAX`
    cursor: u64,
    closed: bool,
    bytes_written: bool,
    device: Device,
}

impl Session {
    pub(crate) fn new(id: SessionId, access: AccessMode, append: bool, device: Device) -> Self {
        Self {
            id,
            access,
            append,
            cursor: 0,
            closed: false,
            bytes_written: false,
            device,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn access(&self) -> AccessMode {
        self.access
    }

    #[must_use]
    pub fn is_append(&self) -> bool {
        self.append
    }

    /// Current cursor
    #[must_use]
    pub fn position(&self) -> u64 {
        self.cursor
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn ensure_open(&self) -> Result<()> {
        self.ensure_not_closed()?;
        if self.device.is_shut_down() {
            return Err(Error::BadDescriptor("device is shut down"));
        }
        Ok(())
    }

    /// Read from the cursor into `buf`. Returns 0 at or past the end of data.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` if the session is closed or not open for reading.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read_vectored(&mut [IoSliceMut::new(buf)])
    }

    /// Read from the cursor, filling `segments` in order, under one shared
    /// lock acquisition.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` if the session is closed or not open for reading.
    pub fn read_vectored(&mut self, segments: &mut [IoSliceMut<'_>]) -> Result<usize> {
        self.ensure_open()?;
        if !self.access.can_read() {
            return Err(Error::BadDescriptor("session is not open for reading"));
        }
        if segments.iter().all(|s| s.is_empty()) {
            return Ok(0);
        }

        let copied = self.device.store().read().read_at(self.cursor, segments);
        self.cursor += copied as u64;
        self.device.count_read();
        Ok(copied)
    }

    /// Write `buf` at the cursor (or at the end, in append mode).
    ///
    /// # Errors
    ///
    /// `BadDescriptor` if the session is closed or not open for writing,
    /// `CapacityExceeded` if the buffer would grow past its ceiling.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_vectored(&[IoSlice::new(buf)])
    }

    /// Write all `segments` contiguously, atomically: either every segment is
    /// committed or, on error, none is.
    ///
    /// The cursor moves to the end of the written data in both normal and
    /// append mode. Readers are notified after the exclusive lock is released.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` if the session is closed or not open for writing,
    /// `CapacityExceeded` or `OutOfMemory` if the buffer cannot grow.
    pub fn write_vectored(&mut self, segments: &[IoSlice<'_>]) -> Result<usize> {
        self.ensure_open()?;
        if !self.access.can_write() {
            return Err(Error::BadDescriptor("session is not open for writing"));
        }
        if segments.iter().all(|s| s.is_empty()) {
            return Ok(0);
        }

        let report = {
            let mut store = self.device.store().write();
            // Append position is read under the exclusive lock, so
            // concurrent appenders never overwrite each other
            let position = if self.append {
                store.size() as u64
            } else {
                self.cursor
            };
            store.write_at(position, segments)?
        };

        self.cursor = report.end;
        self.bytes_written = true;
        self.device.count_write();

        if report.grew() {
            self.device.registry().notify_readable(report.size_after);
        }
        Ok(report.written)
    }

    /// Move the cursor. Returns the new position.
    ///
    /// Positions past the end of data are allowed; they read as end-of-data.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for `Whence::End`, a negative result or an
    /// overflowing one. The cursor is unchanged on error.
    pub fn seek(&mut self, whence: Whence, offset: i64) -> Result<u64> {
        self.ensure_open()?;
        let candidate = match whence {
            Whence::Set => offset,
            Whence::Cur => i64::try_from(self.cursor)
                .ok()
                .and_then(|cursor| cursor.checked_add(offset))
                .ok_or(Error::InvalidArgument("seek position overflows"))?,
            Whence::End => {
                return Err(Error::InvalidArgument(
                    "seeking relative to the end is not supported",
                ))
            }
        };
        let position = u64::try_from(candidate)
            .map_err(|_| Error::InvalidArgument("seek to a negative position"))?;
        self.cursor = position;
        Ok(position)
    }

    /// [`Self::seek`] with a raw `SEEK_*` code
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown code, plus the errors of `seek`.
    pub fn seek_raw(&mut self, whence: i32, offset: i64) -> Result<u64> {
        self.ensure_open()?;
        self.seek(Whence::try_from(whence)?, offset)
    }

    /// Execute a control command given as a raw code and argument.
    ///
    /// # Errors
    ///
    /// `Unsupported` for an unknown code, `InvalidArgument` for a malformed
    /// argument, `BadDescriptor` on a closed session.
    pub fn control(&mut self, code: u32, arg: u64) -> Result<ControlReply> {
        self.ensure_open()?;
        match ControlCommand::decode(code, arg)? {
            ControlCommand::Clear => {
                self.clear()?;
                Ok(ControlReply::Done)
            }
            ControlCommand::Subscribe(listener) => {
                Ok(ControlReply::Subscribed(self.subscribe(listener)?))
            }
            ControlCommand::Unsubscribe(listener) => {
                self.unsubscribe(listener)?;
                Ok(ControlReply::Done)
            }
        }
    }

    /// Empty the shared buffer. Capacity is kept; cursors are not touched.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` on a closed session.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.device.store().write().clear();
        log::debug!("session.clear: buffer cleared by {}", self.id);
        Ok(())
    }

    /// Register `listener` for readiness signals.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` on a closed session or device.
    pub fn subscribe(&self, listener: ListenerId) -> Result<broadcast::Receiver<Signal>> {
        self.ensure_open()?;
        self.device
            .registry()
            .subscribe(listener, &format!("subscribed via {}", self.id))
    }

    /// Remove a listener registration. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` on a closed session or device.
    pub fn unsubscribe(&self, listener: ListenerId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.device.registry().unsubscribe(listener))
    }

    /// Non-blocking readiness check.
    ///
    /// Readable means the buffer holds any data; writable is always true,
    /// since running out of capacity is an error rather than backpressure.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` on a closed session or device.
    pub fn poll(&self, interest: Interest) -> Result<bool> {
        self.ensure_open()?;
        Ok(match interest {
            Interest::Readable => self.device.store().size() > 0,
            Interest::Writable => true,
        })
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed {
            return Err(Error::BadDescriptor("session is closed"));
        }
        Ok(())
    }

    /// Block until the buffer is readable, the wait is interrupted, the
    /// device hangs up, or `timeout` elapses.
    ///
    /// Waiting on a device that is already shut down returns
    /// `WaitOutcome::Hangup` at once.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` on a closed session.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        self.ensure_not_closed()?;
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let store = self.device.store();
        Ok(self
            .device
            .registry()
            .wait_readable(self.id, || store.size() > 0, deadline))
    }

    /// Async counterpart of [`Self::wait_readable`]; wrap it in
    /// `tokio::time::timeout` for a deadline.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` on a closed session.
    pub async fn wait_readable_async(&self) -> Result<WaitOutcome> {
        self.ensure_not_closed()?;
        let store = self.device.store();
        Ok(self
            .device
            .registry()
            .wait_readable_async(self.id, || store.size() > 0)
            .await)
    }

    /// Handle that can abandon this session's waits from another thread
    #[must_use]
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            session: self.id,
            device: self.device.clone(),
        }
    }

    /// Close the session. The shared buffer is not affected.
    ///
    /// Listeners are told when a session that wrote data closes.
    pub fn close(&mut self) {
        if self.closed {
            log::warn!("Session::close() called on already closed session: {self:?}");
            return;
        }
        self.closed = true;
        self.device.registry().unregister_session(self.id);
        if self.bytes_written {
            self.device.registry().notify_writer_closed(self.id);
        }
        debug!(id = %self.id, cursor = self.cursor, "session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session(id={}, access={:?}, append={}, cursor={}, closed={})",
            self.id, self.access, self.append, self.cursor, self.closed
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close();
        }
    }
}
