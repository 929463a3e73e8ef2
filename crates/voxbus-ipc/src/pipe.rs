//! Pipe ends handed to the bus by components.

use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Closes a pipe from any thread. A writer blocked on the pipe wakes with
/// an error.
pub type PipeCloser = Box<dyn Fn() + Send + Sync>;

/// Write end of a pipe the bus fills. Dropping it closes the pipe.
pub trait PipeWriter: Write + Send {
    /// A closer usable while another thread is blocked writing. `None` when
    /// the transport can only be closed by dropping it.
    fn closer(&self) -> Option<PipeCloser> {
        None
    }
}

pub type PipeSink = Box<dyn PipeWriter>;

impl PipeWriter for UnixStream {
    fn closer(&self) -> Option<PipeCloser> {
        let peer = self.try_clone().ok()?;
        Some(Box::new(move || {
            let _ = peer.shutdown(Shutdown::Both);
        }))
    }
}

impl PipeWriter for File {}

/// Read end of a pipe the bus drains.
pub trait PipeSource: Read + Send {
    /// Bytes readable without blocking, when the transport can tell.
    fn available(&self) -> usize {
        0
    }
}

impl PipeSource for Cursor<Vec<u8>> {
    fn available(&self) -> usize {
        let len = self.get_ref().len() as u64;
        len.saturating_sub(self.position()) as usize
    }
}

impl PipeSource for UnixStream {}

impl PipeSource for File {}

impl PipeSource for Box<dyn PipeSource> {
    fn available(&self) -> usize {
        (**self).available()
    }
}

/// In-memory pipe write end that records bytes and whether it was closed.
pub struct CapturePipe {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

/// Observer side of a [`CapturePipe`].
#[derive(Clone)]
pub struct CaptureHandle {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl CapturePipe {
    pub fn pair() -> (Self, CaptureHandle) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                buf: buf.clone(),
                closed: closed.clone(),
            },
            CaptureHandle { buf, closed },
        )
    }
}

impl Write for CapturePipe {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PipeWriter for CapturePipe {
    fn closer(&self) -> Option<PipeCloser> {
        let closed = self.closed.clone();
        Some(Box::new(move || closed.store(true, Ordering::SeqCst)))
    }
}

impl Drop for CapturePipe {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl CaptureHandle {
    pub fn bytes(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reports_remaining_bytes() {
        let mut cursor = Cursor::new(vec![0u8; 100]);
        assert_eq!(PipeSource::available(&cursor), 100);
        let mut buf = [0u8; 30];
        cursor.read_exact(&mut buf).unwrap();
        assert_eq!(PipeSource::available(&cursor), 70);
    }

    #[test]
    fn capture_pipe_records_and_closes() {
        let (mut pipe, handle) = CapturePipe::pair();
        pipe.write_all(b"abc").unwrap();
        assert!(!handle.is_closed());
        drop(pipe);
        assert!(handle.is_closed());
        assert_eq!(handle.bytes(), b"abc");
    }

    #[test]
    fn capture_pipe_closer_fails_later_writes() {
        let (mut pipe, handle) = CapturePipe::pair();
        let close = pipe.closer().unwrap();
        pipe.write_all(b"ab").unwrap();
        close();
        assert!(handle.is_closed());
        assert_eq!(pipe.write(b"c").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(handle.bytes(), b"ab");
    }

    #[test]
    fn unix_stream_closer_wakes_blocked_writer() {
        let (writer, _unread) = UnixStream::pair().unwrap();
        let close = writer.closer().unwrap();
        let blocked = std::thread::spawn(move || {
            let mut writer = writer;
            let chunk = vec![0u8; 64 * 1024];
            loop {
                if let Err(e) = writer.write_all(&chunk) {
                    return e.kind();
                }
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
        close();
        assert_eq!(blocked.join().unwrap(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn unix_stream_has_no_size_hint() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert_eq!(a.available(), 0);
    }
}
