//! Reassembly of container output into lines.

/// Turn one raw line into text: invalid UTF-8 is replaced and a trailing
/// carriage return (from a pseudo-terminal) is dropped.
pub(crate) fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Splits output arriving in arbitrary chunks into complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk, returning every line it completes.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            lines.push(decode_line(&line[..pos]));
        }
        lines
    }

    /// The unterminated tail, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(decode_line(&std::mem::take(&mut self.buffer)))
        }
    }
}
