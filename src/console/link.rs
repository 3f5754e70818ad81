use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use serialport::SerialPort;
use tokio::sync::mpsc;

use super::{ConsoleDecoder, ConsoleError, ConsoleEvent, ConsoleStatus};

const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Names of the serial ports visible on this machine.
pub fn list_ports() -> Result<Vec<String>, ConsoleError> {
    let ports = serialport::available_ports().map_err(|e| ConsoleError::Open {
        path: "*".to_string(),
        source: e,
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// An open console connection.
///
/// Dropping the receiver returned by [`ConsoleLink::open`] does not stop the reader;
/// call [`ConsoleLink::close`].
pub struct ConsoleLink {
    path: String,
    writer: Mutex<Box<dyn SerialPort>>,
    tx_mask: AtomicU8,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl ConsoleLink {
    pub fn open(
        path: &str,
        baud_rate: u32,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConsoleEvent>), ConsoleError> {
        info!("Opening console on {} at {} baud", path, baud_rate);
        let mut builder = serialport::new(path, baud_rate).timeout(READ_TIMEOUT);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let open_err = |source| ConsoleError::Open {
            path: path.to_string(),
            source,
        };
        let port = builder.open().map_err(open_err)?;
        let reader_port = port.try_clone().map_err(open_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = stop.clone();
            let path = path.to_string();
            std::thread::Builder::new()
                .name("console-reader".into())
                .spawn(move || read_loop(reader_port, stop, tx, &path))?
        };

        Ok((
            Self {
                path: path.to_string(),
                writer: Mutex::new(port),
                tx_mask: AtomicU8::new(0),
                stop,
                reader: Some(reader),
            },
            rx,
        ))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last status mask written to the console.
    pub fn tx_mask(&self) -> u8 {
        self.tx_mask.load(Ordering::Relaxed)
    }

    /// Push the LED state to the console.
    pub fn send_status(&self, status: ConsoleStatus) -> Result<(), ConsoleError> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(ConsoleError::Closed);
        }
        let mask = status.mask();
        self.tx_mask.store(mask, Ordering::Relaxed);
        let mut port = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        port.write_all(&[mask])?;
        port.flush()?;
        Ok(())
    }

    /// Stop the reader (it notices within one read timeout), join it and reset masks.
    /// Blocks; call from `spawn_blocking` in async code.
    pub fn close(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Console reader for {} panicked", self.path);
            }
        }
        self.tx_mask.store(0, Ordering::Relaxed);
        info!("Console on {} closed", self.path);
    }
}

impl Drop for ConsoleLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ConsoleEvent>,
    path: &str,
) {
    let mut decoder = ConsoleDecoder::new();
    let mut byte = [0u8; 1];
    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut byte) {
            Ok(0) => continue,
            Ok(_) => {
                if let Some(event) = decoder.push(byte[0]) {
                    debug!("Console {}: {:?}", path, event);
                    if events.send(event).is_err() {
                        debug!("Console event receiver dropped");
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => {
                if !stop.load(Ordering::Relaxed) {
                    warn!("Console listener error on {}: {}", path, e);
                }
                break;
            }
        }
    }
    debug!("Console reader for {} exited", path);
}
