//! Per-iteration output capture
//!
//! Each iteration gets its own buffer which is handed to every engine call
//! made during that iteration. The buffer is dropped with the iteration, so
//! nothing carries over and no process-wide stream is ever redirected.

use std::io::{self, Write};

/// Buffer receiving everything the program writes to standard output
#[derive(Debug, Default)]
pub struct OutputCapture {
    buffer: Vec<u8>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured bytes, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

impl Write for OutputCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
