//! `std::io` and `embedded_io` trait implementations for [`Session`]
//!
//! Lets a session be handed to code written against the standard I/O traits
//! (`io::copy`, `BufReader`, ...) or the `embedded_io` ones.

use std::io;

use crate::error::Error;
use crate::session::{Session, Whence};

fn start_offset(pos: u64) -> Result<i64, Error> {
    i64::try_from(pos).map_err(|_| Error::InvalidArgument("seek position overflows"))
}

impl io::Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Session::read(self, buf)?)
    }

    fn read_vectored(&mut self, bufs: &mut [io::IoSliceMut<'_>]) -> io::Result<usize> {
        Ok(Session::read_vectored(self, bufs)?)
    }
}

impl io::Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Session::write(self, buf)?)
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        Ok(Session::write_vectored(self, bufs)?)
    }

    /// Writes are committed to the shared buffer immediately
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for Session {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (whence, offset) = match pos {
            io::SeekFrom::Start(n) => (Whence::Set, start_offset(n)?),
            io::SeekFrom::Current(n) => (Whence::Cur, n),
            io::SeekFrom::End(n) => (Whence::End, n),
        };
        Ok(Session::seek(self, whence, offset)?)
    }
}

impl embedded_io::ErrorType for Session {
    type Error = Error;
}

impl embedded_io::Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Session::read(self, buf)
    }
}

impl embedded_io::Write for Session {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Session::write(self, buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Seek for Session {
    fn seek(&mut self, pos: embedded_io::SeekFrom) -> Result<u64, Self::Error> {
        let (whence, offset) = match pos {
            embedded_io::SeekFrom::Start(n) => (Whence::Set, start_offset(n)?),
            embedded_io::SeekFrom::Current(n) => (Whence::Cur, n),
            embedded_io::SeekFrom::End(n) => (Whence::End, n),
        };
        Session::seek(self, whence, offset)
    }
}
