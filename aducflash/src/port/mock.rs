//! In-memory port for protocol tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::{LineSettings, Parity, Port, StopBits};

/// What `wait_readable` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    Timeout,
    Fail,
}

/// Port with scripted replies and recorded writes.
///
/// Every queued reply is handed out by separate `read` calls, so one reply
/// never bleeds into the next read.
pub(crate) struct MockPort {
    pub replies: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
    pub settings: LineSettings,
    pub applied: Vec<LineSettings>,
    pub readiness: Readiness,
    pub input_cleared: usize,
    pub closed: bool,
}

impl MockPort {
    /// Port whose current line settings differ from the raw bootloader line.
    pub fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            writes: Vec::new(),
            settings: LineSettings {
                baud_rate: 115200,
                parity: Parity::Even,
                stop_bits: StopBits::Two,
                ..LineSettings::raw(115200)
            },
            applied: Vec::new(),
            readiness: Readiness::Ready,
            input_cleared: 0,
            closed: false,
        }
    }

    /// Queue the 24 byte device ID reply of the handshake.
    pub fn with_device_id(mut self) -> Self {
        self.replies
            .push_back(b"ADuC7026   62kB  V2.3\r\n\0".to_vec());
        self
    }

    pub fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies
            .push_back(bytes.to_vec());
        self
    }

    pub fn acks(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.replies
                .push_back(vec![0x06]);
        }
        self
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(front) = self
            .replies
            .front_mut()
        else {
            return Ok(0);
        };
        let n = buf.len().min(front.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.drain(..n);
        if front.is_empty() {
            self.replies
                .pop_front();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes
            .push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        "mock"
    }

    fn line_settings(&mut self) -> Result<LineSettings> {
        Ok(self.settings)
    }

    fn apply_line_settings(&mut self, settings: &LineSettings) -> Result<()> {
        self.settings = *settings;
        self.applied
            .push(*settings);
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.input_cleared += 1;
        Ok(())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool> {
        match self.readiness {
            Readiness::Ready => Ok(true),
            Readiness::Timeout => Ok(false),
            Readiness::Fail => Err(Error::Io(io::Error::other("select failed"))),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
