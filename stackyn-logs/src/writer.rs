use std::io;

use stackyn_common::models::LogKind;
use stackyn_common::Id;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::warn;

use crate::persist::LogPersister;

/// A `std::io::Write` sink that buffers bytes until a newline and flushes
/// each line to the persister, following
/// `deployer/src/deployment/build_logs.rs`'s `BuildLogWriter`. Used as one
/// leg of the build worker's `MultiWriter`: the other leg is the worker
/// process's own stdout for operational observability.
pub struct LogWriter {
    buffer: Vec<u8>,
    tx: UnboundedSender<Vec<u8>>,
}

impl LogWriter {
    pub fn new(persister: LogPersister, app_id: Id, owner_id: Id, kind: LogKind) -> Self {
        let (tx, mut rx) = unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(err) = persister.persist_log(app_id, owner_id, kind, &line).await {
                    warn!(error = ?err, %app_id, %owner_id, "failed to persist log line");
                }
            }
        });

        Self {
            buffer: Vec::new(),
            tx,
        }
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Buffer raw bytes rather than decoding to `char` — build/runtime
        // output is not guaranteed to be ASCII, and splitting multi-byte
        // UTF-8 sequences one byte at a time would corrupt them.
        for &byte in buf {
            if byte == b'\n' {
                self.flush()?;
            } else {
                self.buffer.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.buffer);
        let _ = self.tx.send(line);
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}
