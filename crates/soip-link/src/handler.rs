//! [`LinkHandler`]: owns one transport connection and one local serial
//! device, and runs the two per-link worker threads (network RX, serial
//! TX) that keep them in sync.
//!
//! `LinkHandler-COM` and `LinkHandler-VCOM` are not two separate types:
//! both are instantiations of `LinkHandler<D>` for `D = ComDevice` and
//! `D = VirtualDevice` respectively. The behavioral differences between
//! them (event-driven line signals vs. externally-driven configuration)
//! fall out of what `SerialEvent`s each `D` actually produces — the serial
//! loop below handles every event variant generically.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use soip_serial::{SerialConfig, SerialDevice, SerialEvent};

use crate::frame::{self, MAX_OPERATION_BYTES};
use crate::protocol::{self, OpCode, Operation};
use crate::registry::LinkHandlerDyn;
use crate::ring::{self, RingBuffer};

/// Timeout on an outstanding `OPEN_PORT`/`CLOSE_PORT`/`CONFIGURE_PORT`
/// handshake before the requester gives up (spec default: 4s).
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(4);

/// Consecutive no-work serial-loop iterations before the next event wait
/// is allowed to block rather than poll.
const HALT_THRESHOLD: u32 = 4;

/// A pending serial read is retried once after this sleep before the
/// iteration is given up as no-work.
const READ_RETRY_SLEEP: Duration = Duration::from_millis(10);

/// How long a burst of VCOM configuration changes is allowed to settle
/// before the resulting config is pushed to the peer.
const CONFIG_SETTLE_SLEEP: Duration = Duration::from_millis(100);

/// One end-to-end association: one socket, one local serial device, the
/// RX/TX threads that drive them, and the handshake/flow-control state
/// shared between the two.
pub struct LinkHandler<D> {
    id: String,
    alive: AtomicBool,

    socket_write: Mutex<TcpStream>,

    /// Guards the whole local device lifecycle: open/close/config as well
    /// as the non-blocking I/O calls the serial loop makes. A single lock
    /// keeps every call into `D` exclusive, at the cost of a structural
    /// request (e.g. an inbound `CLOSE_PORT`) occasionally waiting out the
    /// serial loop's current `wait_events` call — bounded by that call's
    /// own internal timeout, never by the 4s handshake timeout.
    device: Mutex<Option<D>>,
    device_cv: Condvar,
    local_port_name: Mutex<Option<String>>,

    remote_port_name: Mutex<Option<String>>,

    ring: RingBuffer,

    /// May we read local serial and forward it as `STREAM_SERIAL`? Set by
    /// inbound `FLOW_CONTROL`.
    flow_enable: AtomicBool,
    /// Have we told the peer to keep sending? Set by our own outbound
    /// `FLOW_CONTROL`, driven by `ring` occupancy.
    remote_flow_enable: AtomicBool,

    handshake: Mutex<Option<bool>>,
    handshake_cv: Condvar,

    rx_thread: Mutex<Option<JoinHandle<()>>>,
    tx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<D: SerialDevice + Send + 'static> LinkHandler<D> {
    /// Takes ownership of an already-connected socket and spawns the RX
    /// and TX worker threads. No local serial device is open yet; the TX
    /// thread blocks on `device_cv` until one is.
    pub fn spawn(stream: TcpStream) -> std::io::Result<Arc<Self>> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let id = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());

        let handler = Arc::new(Self {
            id,
            alive: AtomicBool::new(true),
            socket_write: Mutex::new(stream),
            device: Mutex::new(None),
            device_cv: Condvar::new(),
            local_port_name: Mutex::new(None),
            remote_port_name: Mutex::new(None),
            ring: RingBuffer::new(ring::DEFAULT_CAPACITY),
            flow_enable: AtomicBool::new(true),
            remote_flow_enable: AtomicBool::new(true),
            handshake: Mutex::new(None),
            handshake_cv: Condvar::new(),
            rx_thread: Mutex::new(None),
            tx_thread: Mutex::new(None),
        });

        let rx_handler = handler.clone();
        let rx = thread::Builder::new()
            .name(format!("soip-rx-{}", handler.id))
            .spawn(move || rx_handler.rx_loop(reader))
            .expect("spawn soip-rx thread");
        *handler.rx_thread.lock().unwrap() = Some(rx);

        let tx_handler = handler.clone();
        let tx = thread::Builder::new()
            .name(format!("soip-tx-{}", handler.id))
            .spawn(move || tx_handler.tx_loop())
            .expect("spawn soip-tx thread");
        *handler.tx_thread.lock().unwrap() = Some(tx);

        Ok(handler)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    // ---- public contract (§4.4) ----

    /// Closes any currently-open device, then opens `name`. Called both by
    /// the CLI's initial bring-up and by an inbound `OPEN_PORT` request.
    pub fn open_local_port(&self, name: &str) -> bool {
        let mut guard = self.device.lock().unwrap();
        if let Some(dev) = guard.as_mut() {
            dev.close();
        }
        match D::open(name) {
            Ok(dev) => {
                *guard = Some(dev);
                *self.local_port_name.lock().unwrap() = Some(name.to_string());
                drop(guard);
                self.device_cv.notify_all();
                tracing::info!(id = %self.id, port = name, "local port opened");
                true
            }
            Err(e) => {
                tracing::warn!(id = %self.id, port = name, error = %e, "failed to open local port");
                *guard = None;
                false
            }
        }
    }

    /// Idempotent: always returns `true`, closing the device if one is open.
    pub fn close_local_port(&self) -> bool {
        let mut guard = self.device.lock().unwrap();
        if let Some(dev) = guard.as_mut() {
            dev.close();
            tracing::info!(id = %self.id, "local port closed");
        }
        *guard = None;
        *self.local_port_name.lock().unwrap() = None;
        true
    }

    /// Requires a port to already be open; a no-op success for VCOM
    /// devices (configuration there is externally driven — `D::set_config`
    /// implements that contract itself).
    pub fn set_local_config(&self, cfg: SerialConfig) -> bool {
        let mut guard = self.device.lock().unwrap();
        match guard.as_mut() {
            Some(dev) => match dev.set_config(&cfg) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(id = %self.id, error = %e, "failed to apply local config");
                    false
                }
            },
            None => false,
        }
    }

    pub fn open_remote_port(&self, name: &str) -> bool {
        *self.remote_port_name.lock().unwrap() = Some(name.to_string());
        self.handshake(OpCode::OpenPort as u8, protocol::encode_open_port(name).as_slice())
    }

    /// Returns `true` without any wire I/O if no remote port was ever
    /// opened on this link.
    pub fn close_remote_port(&self) -> bool {
        if self.remote_port_name.lock().unwrap().is_none() {
            return true;
        }
        self.handshake(OpCode::ClosePort as u8, &protocol::encode_close_port())
    }

    pub fn set_remote_config(&self, cfg: SerialConfig) -> bool {
        self.handshake(OpCode::ConfigurePort as u8, &protocol::encode_configure_port(&cfg))
    }

    // ---- internals ----

    fn handshake(&self, op_code: u8, payload: &[u8]) -> bool {
        let mut slot = self.handshake.lock().unwrap();
        *slot = None;
        if self.send_frame(op_code, payload).is_err() {
            return false;
        }
        let (slot, timed_out) =
            self.handshake_cv.wait_timeout_while(slot, HANDSHAKE_TIMEOUT, |s| s.is_none()).unwrap();
        if timed_out.timed_out() {
            tracing::warn!(id = %self.id, op = op_code, "handshake timed out");
            return false;
        }
        slot.unwrap_or(false)
    }

    fn send_frame(&self, op_code: u8, payload: &[u8]) -> frame::Result<()> {
        let mut writer = self.socket_write.lock().unwrap();
        let result = frame::write_frame(&mut *writer, op_code, payload);
        if let Err(ref e) = result {
            tracing::warn!(id = %self.id, error = %e, "frame send failed");
            drop(writer);
            self.shutdown();
        }
        result
    }

    /// Best-effort wake of a TX thread possibly blocked in `wait_events`.
    /// If the device lock is currently held (the TX thread is mid-call)
    /// this is a no-op: the call's own poll timeout bounds the delay.
    fn wake_tx(&self) {
        if let Ok(guard) = self.device.try_lock() {
            if let Some(dev) = guard.as_ref() {
                dev.abort_wait();
            }
        }
    }

    fn rx_loop(self: Arc<Self>, mut reader: TcpStream) {
        while self.alive.load(Ordering::Acquire) {
            match frame::read_frame(&mut reader) {
                Ok(decoded) => self.dispatch(decoded.op_code, decoded.payload.as_slice()),
                Err(e) => {
                    tracing::warn!(id = %self.id, error = %e, "transport fault, tearing link down");
                    self.shutdown();
                    break;
                }
            }
        }
    }

    fn dispatch(&self, op_code: u8, payload: &[u8]) {
        match protocol::decode(op_code, payload) {
            Ok(op) => self.handle_operation(op),
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "protocol fault");
                let _ = self.send_frame(OpCode::Error as u8, protocol::encode_error(&e.to_string()).as_slice());
            }
        }
    }

    fn handle_operation(&self, op: Operation) {
        match op {
            Operation::Error(message) => {
                tracing::warn!(id = %self.id, %message, "peer reported protocol error");
                let mut slot = self.handshake.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(false);
                    drop(slot);
                    self.handshake_cv.notify_all();
                }
            }
            Operation::Confirm(ok) => {
                *self.handshake.lock().unwrap() = Some(ok);
                self.handshake_cv.notify_all();
            }
            Operation::OpenPort(name) => {
                let ok = self.open_local_port(&name);
                let _ = self.send_frame(OpCode::Confirm as u8, &protocol::encode_confirm(ok));
            }
            Operation::ClosePort => {
                let ok = self.close_local_port();
                let _ = self.send_frame(OpCode::Confirm as u8, &protocol::encode_confirm(ok));
            }
            Operation::ConfigurePort(cfg) => {
                let ok = self.set_local_config(cfg);
                let _ = self.send_frame(OpCode::Confirm as u8, &protocol::encode_confirm(ok));
            }
            Operation::StreamSerial(bytes) => {
                let pushed = self.ring.push(bytes.as_slice());
                self.wake_tx();
                if pushed < bytes.as_slice().len() {
                    let _ = self.send_frame(
                        OpCode::Error as u8,
                        protocol::encode_error("reception buffer overflow, flow control failed").as_slice(),
                    );
                }
            }
            Operation::FlowControl(peer_ready) => {
                self.flow_enable.store(peer_ready, Ordering::Release);
                self.wake_tx();
            }
            Operation::PortState { dtr, rts } => {
                let mut guard = self.device.lock().unwrap();
                if let Some(dev) = guard.as_mut() {
                    if let Err(e) = dev.set_port_state(dtr, rts) {
                        tracing::warn!(id = %self.id, error = %e, "failed to apply peer port state");
                    }
                }
                drop(guard);
                self.wake_tx();
            }
        }
    }

    /// The serial-side loop (spec §4.5/§4.6): drains `ring` to the local
    /// device, pulls local-device bytes onto the wire when flow control
    /// allows, and waits on the device's event source between iterations.
    fn tx_loop(self: Arc<Self>) {
        let mut halt_cycles: u32 = 0;

        loop {
            if !self.alive.load(Ordering::Acquire) {
                return;
            }

            let mut guard = self.device.lock().unwrap();
            guard = self
                .device_cv
                .wait_while(guard, |d| d.is_none() && self.alive.load(Ordering::Acquire))
                .unwrap();
            if !self.alive.load(Ordering::Acquire) {
                return;
            }
            let Some(dev) = guard.as_mut() else {
                // Woken spuriously with the device still absent; loop and
                // wait again.
                continue;
            };

            let mut work_done = false;

            if self.ring.available() > 0 {
                let occupancy = self.ring.available();
                let segment = self.ring.contiguous_read_segment();
                match dev.write_nonblocking(segment) {
                    Ok(-2) => {}
                    Ok(-1) => {
                        let capacity = self.ring.capacity();
                        if occupancy * 4 > capacity * 3 && self.remote_flow_enable.load(Ordering::Acquire) {
                            self.send_locked(OpCode::FlowControl as u8, &protocol::encode_flow_control(false));
                            self.remote_flow_enable.store(false, Ordering::Release);
                        }
                    }
                    Ok(n) if n >= 0 => {
                        self.ring.advance_read(n as usize);
                        work_done = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(id = %self.id, error = %e, "serial write failed, tearing link down");
                        drop(guard);
                        self.shutdown();
                        return;
                    }
                }
            }
            if self.ring.available() == 0 && !self.remote_flow_enable.load(Ordering::Acquire) {
                self.send_locked(OpCode::FlowControl as u8, &protocol::encode_flow_control(true));
                self.remote_flow_enable.store(true, Ordering::Release);
            }

            if self.flow_enable.load(Ordering::Acquire) {
                let dev = guard.as_mut().unwrap();
                let mut buf = [0u8; MAX_OPERATION_BYTES];
                let mut outcome = dev.read_nonblocking(&mut buf);
                if matches!(outcome, Ok(-1)) {
                    thread::sleep(READ_RETRY_SLEEP);
                    outcome = guard.as_mut().unwrap().read_nonblocking(&mut buf);
                }
                match outcome {
                    Ok(n) if n > 0 => {
                        if !self.send_locked(OpCode::StreamSerial as u8, &buf[..n as usize]) {
                            drop(guard);
                            self.shutdown();
                            return;
                        }
                        work_done = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(id = %self.id, error = %e, "serial read failed, tearing link down");
                        drop(guard);
                        self.shutdown();
                        return;
                    }
                }
            }

            halt_cycles = if work_done { 0 } else { halt_cycles + 1 };
            let wait = halt_cycles > HALT_THRESHOLD;

            let dev = guard.as_mut().unwrap();
            let event = dev.wait_events(wait);
            if wait {
                halt_cycles = 0;
            }

            match event {
                Ok(SerialEvent::LineStateChanged) => {
                    let dev = guard.as_mut().unwrap();
                    match dev.port_state() {
                        Ok((dsr, cts)) => {
                            if !self.send_locked(OpCode::PortState as u8, &protocol::encode_port_state(dsr, cts)) {
                                drop(guard);
                                self.shutdown();
                                return;
                            }
                        }
                        Err(e) => tracing::warn!(id = %self.id, error = %e, "failed to read local line state"),
                    }
                }
                Ok(SerialEvent::ConfigChanged) => {
                    drop(guard);
                    thread::sleep(CONFIG_SETTLE_SLEEP);
                    guard = self.device.lock().unwrap();
                    if let Some(dev) = guard.as_mut() {
                        match dev.current_config() {
                            Ok(cfg) => {
                                self.send_locked(OpCode::ConfigurePort as u8, &protocol::encode_configure_port(&cfg));
                            }
                            Err(e) => tracing::warn!(id = %self.id, error = %e, "failed to read updated local config"),
                        }
                    }
                }
                Ok(SerialEvent::DataReceived | SerialEvent::TransmitDrained | SerialEvent::Idle | SerialEvent::Aborted) => {}
                Err(e) => {
                    tracing::error!(id = %self.id, error = %e, "serial event wait failed, tearing link down");
                    drop(guard);
                    self.shutdown();
                    return;
                }
            }
        }
    }

    /// Sends a frame while the device mutex is already held by the caller
    /// (the TX loop). Never recurses into `shutdown()` itself — callers
    /// that consider a failed send fatal (`STREAM_SERIAL`, `PORT_STATE`,
    /// per spec §4.5) check the return value and tear the link down
    /// themselves after releasing the device lock.
    fn send_locked(&self, op_code: u8, payload: &[u8]) -> bool {
        let mut writer = self.socket_write.lock().unwrap();
        match frame::write_frame(&mut *writer, op_code, payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "frame send failed");
                false
            }
        }
    }
}

impl<D: SerialDevice + Send + 'static> LinkHandlerDyn for LinkHandler<D> {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Transitions `Alive -> Dead` exactly once. Closes the socket first
    /// (unblocking the RX thread), then the local device (unblocking the
    /// TX thread's event wait), releases any blocked handshake waiter,
    /// and notifies the registry.
    fn shutdown(&self) -> bool {
        if self.alive.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }
        tracing::info!(id = %self.id, "link shutting down");

        {
            let mut slot = self.handshake.lock().unwrap();
            *slot = Some(false);
        }
        self.handshake_cv.notify_all();

        let _ = self.socket_write.lock().unwrap().shutdown(Shutdown::Both);

        {
            let mut guard = self.device.lock().unwrap();
            if let Some(dev) = guard.as_mut() {
                dev.abort_wait();
                dev.close();
            }
            *guard = None;
        }
        self.device_cv.notify_all();

        crate::registry::HandlerRegistry::global().notify_death();
        true
    }

    fn join(&self) {
        if let Some(handle) = self.rx_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.tx_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
