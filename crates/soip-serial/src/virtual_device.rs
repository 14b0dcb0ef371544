use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use crate::config::SerialConfig;
use crate::device::{SerialDevice, SerialEvent};
use crate::error::{Result, SerialError};

const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(200);

struct Inner {
    open: bool,
    /// Bytes the attached application has queued; drained by the link
    /// engine's `read_nonblocking` and emitted as `STREAM_SERIAL`.
    to_link: VecDeque<u8>,
    /// Bytes the link engine has written via `write_nonblocking`, pending
    /// collection by the attached application.
    to_app: VecDeque<u8>,
    dtr: bool,
    rts: bool,
    dsr: bool,
    cts: bool,
    config: SerialConfig,
    config_dirty: bool,
}

struct Shared {
    state: Mutex<Inner>,
    cv: Condvar,
    abort: AtomicBool,
}

impl Shared {
    fn fresh() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Inner {
                open: true,
                to_link: VecDeque::new(),
                to_app: VecDeque::new(),
                dtr: false,
                rts: false,
                dsr: false,
                cts: false,
                config: SerialConfig::default(),
                config_dirty: false,
            }),
            cv: Condvar::new(),
            abort: AtomicBool::new(false),
        })
    }
}

/// An in-process virtual serial device: no OS driver, no named pipe, just
/// a pair of byte queues. Configuration is not set by `set_config` (that
/// call is a no-op per the VCOM contract) but by whatever owns the
/// [`VirtualEndpoint`] — typically a test harness standing in for the
/// attached application that would otherwise drive a real VCOM port.
#[derive(Clone)]
pub struct VirtualDevice {
    shared: Arc<Shared>,
}

/// The "attached application" side of a [`VirtualDevice`], used by tests
/// (and would be used by a real VCOM-facing process) to inject/collect
/// bytes and to change the device's configuration out of band.
#[derive(Clone)]
pub struct VirtualEndpoint {
    shared: Arc<Shared>,
}

impl VirtualDevice {
    /// Creates a connected `(device, endpoint)` pair. The device side is
    /// what `soip-link` drives through [`SerialDevice`]; the endpoint side
    /// is the simulated application.
    #[must_use]
    pub fn open_paired() -> (Self, VirtualEndpoint) {
        let shared = Shared::fresh();
        (Self { shared: shared.clone() }, VirtualEndpoint { shared })
    }
}

/// Process-wide directory of named virtual ports, the way `com0com`- or
/// `socat`-style virtual serial pairs let two independent opens of the same
/// name find each other. `SerialDevice::open` looks a name up here (or
/// creates it on first use); `VirtualEndpoint::named` gives a test harness
/// or attached application the other side of that same shared state.
static NAMED_PORTS: OnceLock<Mutex<HashMap<String, Arc<Shared>>>> = OnceLock::new();

fn named_ports() -> &'static Mutex<HashMap<String, Arc<Shared>>> {
    NAMED_PORTS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn shared_for(name: &str) -> Arc<Shared> {
    let mut ports = named_ports().lock().unwrap();
    ports.entry(name.to_string()).or_insert_with(Shared::fresh).clone()
}

impl VirtualEndpoint {
    /// Returns the application-side handle for the named port `name`,
    /// creating it if no device has opened that name yet.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self { shared: shared_for(name) }
    }
}

impl VirtualEndpoint {
    /// Queues bytes for the link engine to read and forward over the wire.
    pub fn push_to_link(&self, bytes: &[u8]) {
        let mut inner = self.shared.state.lock().unwrap();
        inner.to_link.extend(bytes.iter().copied());
        drop(inner);
        self.shared.cv.notify_all();
    }

    /// Drains bytes the link engine has written (received from the peer).
    pub fn drain_from_link(&self) -> Vec<u8> {
        let mut inner = self.shared.state.lock().unwrap();
        inner.to_app.drain(..).collect()
    }

    /// Bytes queued via `push_to_link` that the link engine hasn't read
    /// yet. Used by tests to observe whether the link side has paused
    /// reading (e.g. under flow control) without draining the queue.
    #[must_use]
    pub fn pending_to_link(&self) -> usize {
        self.shared.state.lock().unwrap().to_link.len()
    }

    pub fn set_config(&self, cfg: SerialConfig) {
        let mut inner = self.shared.state.lock().unwrap();
        inner.config = cfg;
        inner.config_dirty = true;
        drop(inner);
        self.shared.cv.notify_all();
    }

    #[must_use]
    pub fn config(&self) -> SerialConfig {
        self.shared.state.lock().unwrap().config
    }

    pub fn set_line_state(&self, dsr: bool, cts: bool) {
        let mut inner = self.shared.state.lock().unwrap();
        inner.dsr = dsr;
        inner.cts = cts;
        drop(inner);
        self.shared.cv.notify_all();
    }

    #[must_use]
    pub fn input_lines(&self) -> (bool, bool) {
        let inner = self.shared.state.lock().unwrap();
        (inner.dtr, inner.rts)
    }
}

impl SerialDevice for VirtualDevice {
    fn open(name: &str) -> Result<Self> {
        Ok(Self { shared: shared_for(name) })
    }

    fn close(&mut self) {
        self.shared.state.lock().unwrap().open = false;
        self.shared.cv.notify_all();
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().unwrap().open
    }

    fn set_config(&mut self, _cfg: &SerialConfig) -> Result<()> {
        // The VCOM contract: configuration is owned by the attached
        // application, not by the link engine.
        Ok(())
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<isize> {
        let mut inner = self.shared.state.lock().unwrap();
        if !inner.open {
            return Ok(-2);
        }
        if inner.to_link.is_empty() {
            return Ok(-1);
        }
        let n = inner.to_link.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inner.to_link.pop_front().unwrap();
        }
        Ok(n as isize)
    }

    fn write_nonblocking(&mut self, buf: &[u8]) -> Result<isize> {
        let mut inner = self.shared.state.lock().unwrap();
        if !inner.open {
            return Ok(-2);
        }
        inner.to_app.extend(buf.iter().copied());
        Ok(buf.len() as isize)
    }

    fn port_state(&self) -> Result<(bool, bool)> {
        let inner = self.shared.state.lock().unwrap();
        if !inner.open {
            return Err(SerialError::NotOpen);
        }
        Ok((inner.dsr, inner.cts))
    }

    fn set_port_state(&mut self, dtr: bool, rts: bool) -> Result<()> {
        let mut inner = self.shared.state.lock().unwrap();
        if !inner.open {
            return Err(SerialError::NotOpen);
        }
        inner.dtr = dtr;
        inner.rts = rts;
        Ok(())
    }

    fn wait_events(&mut self, wait: bool) -> Result<SerialEvent> {
        self.shared.abort.store(false, Ordering::Release);
        let mut inner = self.shared.state.lock().unwrap();

        loop {
            if inner.config_dirty {
                inner.config_dirty = false;
                return Ok(SerialEvent::ConfigChanged);
            }
            if !inner.to_link.is_empty() {
                return Ok(SerialEvent::DataReceived);
            }
            if self.shared.abort.load(Ordering::Acquire) {
                self.shared.abort.store(false, Ordering::Release);
                return Ok(SerialEvent::Aborted);
            }
            if !wait {
                return Ok(SerialEvent::Idle);
            }

            let (guard, timeout) = self.shared.cv.wait_timeout(inner, EVENT_WAIT_TIMEOUT).unwrap();
            inner = guard;
            if timeout.timed_out() {
                return Ok(SerialEvent::Idle);
            }
        }
    }

    fn abort_wait(&self) {
        self.shared.abort.store(true, Ordering::Release);
        self.shared.cv.notify_all();
    }

    fn current_config(&self) -> Result<SerialConfig> {
        Ok(self.shared.state.lock().unwrap().config)
    }
}
