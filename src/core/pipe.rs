use crate::config::types::{MonitorError, Result};
use crate::observability::metrics::MetricsRegistry;
use crossbeam_channel::{Receiver, Sender};
use nix::fcntl::{fcntl, FcntlArg};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::os::fd::FromRawFd;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread;

/// Capacity of the handoff between the control loop and the outbound writer
pub const HANDOFF_CAPACITY: usize = 1;

fn to_ipc_error(prefix: &str, err: impl std::fmt::Display) -> MonitorError {
    MonitorError::Ipc(format!("{prefix}: {err}"))
}

/// Take ownership of a descriptor inherited from the parent process
///
/// The descriptor must not be used elsewhere in this process afterwards.
pub fn open_inherited(fd: RawFd) -> Result<File> {
    fcntl(fd, FcntlArg::F_GETFD).map_err(|e| to_ipc_error(&format!("fd {fd} not open"), e))?;
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Destination for payloads read from the inbound stream
pub trait AddressSink {
    fn deliver(&mut self, payload: String) -> Result<()>;
}

impl AddressSink for Sender<String> {
    fn deliver(&mut self, payload: String) -> Result<()> {
        self.send(payload)
            .map_err(|e| to_ipc_error("inbound consumer gone", e))
    }
}

/// Sink that logs each observed address and remembers the latest one
///
/// Payloads are opaque; nothing here interprets their contents.
#[derive(Debug, Default)]
pub struct LoggingAddressSink {
    label: String,
    pub delivered: u64,
    pub last_address: Option<String>,
}

impl LoggingAddressSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            delivered: 0,
            last_address: None,
        }
    }
}

impl AddressSink for LoggingAddressSink {
    fn deliver(&mut self, payload: String) -> Result<()> {
        self.delivered += 1;
        log::info!("{} observed address {}", self.label, payload);
        self.last_address = Some(payload);
        Ok(())
    }
}

/// Decode JSON values from `reader` until end of stream
///
/// Strings are delivered unwrapped; any other value is delivered as its JSON
/// text. A malformed value is counted and skipped, and decoding resumes after
/// the offending bytes. Returns the number of delivered payloads.
pub fn run_inbound<R: Read, S: AddressSink + ?Sized>(
    reader: R,
    sink: &mut S,
    metrics: &MetricsRegistry,
) -> Result<u64> {
    let mut reader = BufReader::new(reader);
    let mut delivered = 0u64;

    loop {
        let mut stream = serde_json::Deserializer::from_reader(&mut reader).into_iter::<Value>();

        loop {
            match stream.next() {
                None => {
                    log::debug!("Inbound stream closed after {} values", delivered);
                    return Ok(delivered);
                }
                Some(Ok(value)) => {
                    let payload = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    metrics.inbound_messages.inc();
                    sink.deliver(payload)?;
                    delivered += 1;
                }
                Some(Err(e)) if e.is_eof() => {
                    log::debug!("Inbound stream ended mid-value: {}", e);
                    return Ok(delivered);
                }
                Some(Err(e)) if e.is_io() => {
                    return Err(to_ipc_error("inbound read failed", e));
                }
                Some(Err(e)) => {
                    log::warn!("Skipping malformed inbound value: {}", e);
                    metrics.inbound_malformed.inc();
                    break;
                }
            }
        }
    }
}

/// Encode one directive as a JSON string followed by a newline
pub fn write_directive<W: Write>(writer: &mut W, directive: &str) -> Result<()> {
    serde_json::to_writer(&mut *writer, directive)
        .map_err(|e| to_ipc_error("failed to encode directive", e))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn drain_directives<W: Write>(
    mut writer: W,
    directives: Receiver<String>,
    metrics: &MetricsRegistry,
) -> u64 {
    let mut sent = 0u64;
    for directive in directives.iter() {
        match write_directive(&mut writer, &directive) {
            Ok(()) => {
                sent += 1;
                metrics.directives_sent.inc();
                log::debug!("Sent directive {}", directive);
            }
            Err(e) => {
                metrics.directive_write_failures.inc();
                log::error!("Dropping directive {}: {}", directive, e);
            }
        }
    }
    log::debug!("Outbound writer exiting after {} directives", sent);
    sent
}

/// Spawn the thread that owns the outbound stream
///
/// The thread exits once every returned sender has been dropped and yields
/// the number of directives written.
pub fn spawn_outbound_writer<W: Write + Send + 'static>(
    writer: W,
    metrics: Arc<MetricsRegistry>,
) -> Result<(Sender<String>, thread::JoinHandle<u64>)> {
    let (tx, rx) = crossbeam_channel::bounded(HANDOFF_CAPACITY);
    let handle = thread::Builder::new()
        .name("jitterguard-outbound".to_string())
        .spawn(move || drain_directives(writer, rx, &metrics))?;
    Ok((tx, handle))
}
