//! Tee writers for raw process output.

use std::io::{self, Write};

use boot_types::Classification;
use tracing_subscriber::fmt::MakeWriter;

use crate::Capture;

/// Writer that forwards to the real stdout or stderr and feeds the active
/// capture session.
///
/// Also usable as a [`MakeWriter`], so a `tracing_subscriber::fmt` layer can
/// print through it. Multi-byte characters split across writes are held back
/// until complete.
pub struct CaptureStream {
    capture: Capture,
    classification: Classification,
    pending: Vec<u8>,
}

impl CaptureStream {
    pub(crate) fn new(capture: Capture, classification: Classification) -> Self {
        Self {
            capture,
            classification,
            pending: Vec::new(),
        }
    }

    /// The classification this stream records under.
    pub fn classification(&self) -> Classification {
        self.classification
    }

    fn passthrough(&self, buf: &[u8]) -> io::Result<()> {
        if !self.capture.passthrough() {
            return Ok(());
        }
        match self.classification {
            Classification::Info => io::stdout().lock().write_all(buf),
            Classification::Error => io::stderr().lock().write_all(buf),
        }
    }

    /// Decode as much of the pending bytes as forms complete characters.
    fn decode(&mut self) -> String {
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            // Incomplete sequence at the end: keep it for the next write.
            Err(e) if e.error_len().is_none() => {
                let rest = self.pending.split_off(e.valid_up_to());
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending = rest;
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }
}

impl Clone for CaptureStream {
    fn clone(&self) -> Self {
        Self::new(self.capture.clone(), self.classification)
    }
}

impl Write for CaptureStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.passthrough(buf)?;
        if self.capture.is_active() {
            self.pending.extend_from_slice(buf);
            let text = self.decode();
            if !text.is_empty() {
                self.capture.record(self.classification, &text);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.capture.passthrough() {
            return Ok(());
        }
        match self.classification {
            Classification::Info => io::stdout().flush(),
            Classification::Error => io::stderr().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for CaptureStream {
    type Writer = CaptureStream;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
