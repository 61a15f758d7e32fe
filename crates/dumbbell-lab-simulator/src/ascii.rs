use dumbbell_lab_abstract::{HarnessError, Packet, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{LinkId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiEvent {
    Enqueue,
    Dequeue,
    Drop,
    Receive,
}

impl AsciiEvent {
    fn symbol(self) -> char {
        match self {
            AsciiEvent::Enqueue => '+',
            AsciiEvent::Dequeue => '-',
            AsciiEvent::Drop => 'd',
            AsciiEvent::Receive => 'r',
        }
    }
}

/// Per-packet event log, one line per device event.
pub struct AsciiTrace {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: u64,
    error: Option<std::io::Error>,
}

impl AsciiTrace {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| HarnessError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            lines: 0,
            error: None,
        })
    }

    pub fn record(&mut self, event: AsciiEvent, now: Duration, node: NodeId, link: LinkId, packet: &Packet) {
        if self.error.is_some() {
            return;
        }
        let h = &packet.header;
        let result = writeln!(
            self.writer,
            "{} {:.9} node/{} link/{} uid={} {}:{} > {}:{} seq={} ack={} flags=0x{:02x} len={}",
            event.symbol(),
            now.as_secs_f64(),
            node.0,
            link.0,
            packet.uid,
            packet.src,
            h.src_port,
            packet.dst,
            h.dst_port,
            h.seq,
            h.ack,
            h.flags,
            packet.payload_len
        );
        match result {
            Ok(()) => self.lines += 1,
            Err(e) => self.error = Some(e),
        }
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn finish(&mut self) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(HarnessError::io(&self.path, e));
        }
        self.writer
            .flush()
            .map_err(|e| HarnessError::io(&self.path, e))
    }
}
