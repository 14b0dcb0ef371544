use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::{FlowControl, Parity, SerialConfig, StopBits};
use crate::device::{SerialDevice, SerialEvent};
use crate::error::{Result, SerialError};

/// Poll interval used in place of the platform's native overlapped I/O /
/// event-driven wait. A `read`/`write` that would block under that model
/// returns within this window as `TimedOut`, which we map to `-1` (pending).
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// `wait_events(wait: true)` blocks up to this long, checked in
/// [`POLL_TIMEOUT`]-sized slices so `abort_wait` can interrupt promptly.
const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(200);

/// A real hardware serial port, backed by the `serialport` crate.
pub struct ComDevice {
    port: Box<dyn serialport::SerialPort>,
    last_dsr: bool,
    last_cts: bool,
    abort: Arc<AtomicBool>,
    config: SerialConfig,
}

impl ComDevice {
    fn map_config_error(name: &str, err: serialport::Error) -> SerialError {
        SerialError::UnsupportedConfig(format!("{name}: {err}"))
    }
}

impl SerialDevice for ComDevice {
    fn open(name: &str) -> Result<Self> {
        let port = serialport::new(name, SerialConfig::default().baud_rate)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|e| SerialError::Io(io::Error::other(e)))?;
        tracing::info!(port = name, "opened serial device");
        Ok(Self {
            port,
            last_dsr: false,
            last_cts: false,
            abort: Arc::new(AtomicBool::new(false)),
            config: SerialConfig::default(),
        })
    }

    fn close(&mut self) {
        // `serialport` has no explicit close; dropping the handle releases
        // the OS descriptor. We model "closed" at the soip-link layer by
        // dropping the `ComDevice` entirely, so this is a no-op hook kept
        // for symmetry with the trait contract and VCOM's real teardown.
    }

    fn is_open(&self) -> bool {
        true
    }

    fn set_config(&mut self, cfg: &SerialConfig) -> Result<()> {
        if cfg.stop_bits == StopBits::OneHalf {
            return Err(SerialError::UnsupportedConfig(
                "serialport crate has no 1.5 stop bit variant".to_string(),
            ));
        }
        self.port
            .set_baud_rate(cfg.baud_rate)
            .map_err(|e| Self::map_config_error("baud_rate", e))?;
        self.port
            .set_data_bits(match cfg.data_bits {
                5 => serialport::DataBits::Five,
                6 => serialport::DataBits::Six,
                7 => serialport::DataBits::Seven,
                _ => serialport::DataBits::Eight,
            })
            .map_err(|e| Self::map_config_error("data_bits", e))?;
        self.port
            .set_stop_bits(match cfg.stop_bits {
                StopBits::Two => serialport::StopBits::Two,
                _ => serialport::StopBits::One,
            })
            .map_err(|e| Self::map_config_error("stop_bits", e))?;
        self.port
            .set_parity(match cfg.parity {
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
                // Mark/Space have no dedicated serialport variant; the
                // nearest behaviorally-safe fallback is no parity bit.
                Parity::Mark | Parity::Space | Parity::None => serialport::Parity::None,
            })
            .map_err(|e| Self::map_config_error("parity", e))?;
        self.port
            .set_flow_control(match cfg.flow_control {
                FlowControl::RtsCts => serialport::FlowControl::Hardware,
                FlowControl::XonXoff => serialport::FlowControl::Software,
                FlowControl::DsrDtr | FlowControl::None => serialport::FlowControl::None,
            })
            .map_err(|e| Self::map_config_error("flow_control", e))?;
        self.config = *cfg;
        Ok(())
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<isize> {
        match self.port.read(buf) {
            Ok(0) => Ok(-1),
            Ok(n) => Ok(n as isize),
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => Ok(-1),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe || e.kind() == io::ErrorKind::NotConnected => Ok(-2),
            Err(e) => Err(SerialError::Io(e)),
        }
    }

    fn write_nonblocking(&mut self, buf: &[u8]) -> Result<isize> {
        match self.port.write(buf) {
            Ok(n) => Ok(n as isize),
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => Ok(-1),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe || e.kind() == io::ErrorKind::NotConnected => Ok(-2),
            Err(e) => Err(SerialError::Io(e)),
        }
    }

    fn port_state(&self) -> Result<(bool, bool)> {
        let dsr = self.port.read_dsr().map_err(|e| SerialError::Io(io::Error::other(e)))?;
        let cts = self.port.read_cts().map_err(|e| SerialError::Io(io::Error::other(e)))?;
        Ok((dsr, cts))
    }

    fn set_port_state(&mut self, dtr: bool, rts: bool) -> Result<()> {
        self.port
            .write_data_terminal_ready(dtr)
            .map_err(|e| SerialError::Io(io::Error::other(e)))?;
        self.port
            .write_request_to_send(rts)
            .map_err(|e| SerialError::Io(io::Error::other(e)))?;
        Ok(())
    }

    fn wait_events(&mut self, wait: bool) -> Result<SerialEvent> {
        self.abort.store(false, Ordering::Release);

        let (dsr, cts) = self.port_state()?;
        if dsr != self.last_dsr || cts != self.last_cts {
            self.last_dsr = dsr;
            self.last_cts = cts;
            return Ok(SerialEvent::LineStateChanged);
        }

        if self.port.bytes_to_read().unwrap_or(0) > 0 {
            return Ok(SerialEvent::DataReceived);
        }

        if !wait {
            return Ok(SerialEvent::Idle);
        }

        let mut waited = Duration::ZERO;
        while waited < EVENT_WAIT_TIMEOUT {
            if self.abort.load(Ordering::Acquire) {
                self.abort.store(false, Ordering::Release);
                return Ok(SerialEvent::Aborted);
            }
            std::thread::sleep(POLL_TIMEOUT);
            waited += POLL_TIMEOUT;

            let (dsr, cts) = self.port_state()?;
            if dsr != self.last_dsr || cts != self.last_cts {
                self.last_dsr = dsr;
                self.last_cts = cts;
                return Ok(SerialEvent::LineStateChanged);
            }
            if self.port.bytes_to_read().unwrap_or(0) > 0 {
                return Ok(SerialEvent::DataReceived);
            }
        }
        Ok(SerialEvent::Idle)
    }

    fn abort_wait(&self) {
        self.abort.store(true, Ordering::Release);
    }

    fn current_config(&self) -> Result<SerialConfig> {
        Ok(self.config)
    }
}
