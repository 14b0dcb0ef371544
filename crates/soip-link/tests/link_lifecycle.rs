//! Integration tests over real loopback sockets and in-process virtual
//! serial devices, one per concrete scenario.

use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use soip_link::registry::LinkHandlerDyn;
use soip_link::LinkHandler;
use soip_serial::{
    FlowControl, Parity, Result as SerialResult, SerialConfig, SerialDevice, SerialEvent,
    StopBits, VirtualDevice, VirtualEndpoint,
};

fn connected_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = thread::spawn(move || listener.accept().unwrap().0);
    let client = TcpStream::connect(addr).unwrap();
    let server = accept.join().unwrap();
    (client, server)
}

fn poll_until(deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

// ---- scenario 1 ----

#[test]
fn empty_link_bring_up() {
    let (a_stream, b_stream) = connected_pair();
    let a = LinkHandler::<VirtualDevice>::spawn(a_stream).unwrap();
    let _b = LinkHandler::<VirtualDevice>::spawn(b_stream).unwrap();

    let start = Instant::now();
    assert!(a.open_remote_port("/dev/peer-scenario-1"));
    assert!(start.elapsed() < Duration::from_secs(4));
}

// ---- scenario 2 ----

#[test]
fn configuration_handshake() {
    let (a_stream, b_stream) = connected_pair();
    let a = LinkHandler::<VirtualDevice>::spawn(a_stream).unwrap();
    let _b = LinkHandler::<VirtualDevice>::spawn(b_stream).unwrap();
    assert!(a.open_remote_port("/dev/peer-scenario-2"));

    let cfg = SerialConfig {
        baud_rate: 115_200,
        data_bits: 8,
        stop_bits: StopBits::One,
        parity: Parity::None,
        flow_control: FlowControl::None,
        ..SerialConfig::default()
    };
    assert!(a.set_remote_config(cfg));
}

// ---- scenario 3 ----

#[test]
fn stream_forwarding() {
    let (a_stream, b_stream) = connected_pair();
    let a = LinkHandler::<VirtualDevice>::spawn(a_stream).unwrap();
    let b = LinkHandler::<VirtualDevice>::spawn(b_stream).unwrap();

    let a_endpoint = VirtualEndpoint::named("/dev/it-3-a");
    assert!(a.open_local_port("/dev/it-3-a"));
    let b_endpoint = VirtualEndpoint::named("/dev/it-3-b");
    assert!(b.open_local_port("/dev/it-3-b"));

    a_endpoint.push_to_link(b"hello");

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    poll_until(deadline, || {
        received.extend(b_endpoint.drain_from_link());
        received.len() >= 5
    });

    assert_eq!(received, b"hello");
}

// ---- scenario 4 ----

static THROTTLES: OnceLock<Mutex<HashMap<String, Arc<AtomicBool>>>> = OnceLock::new();

fn throttle_flag(name: &str) -> Arc<AtomicBool> {
    THROTTLES
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap()
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(AtomicBool::new(true)))
        .clone()
}

/// A `VirtualDevice` whose writes can be paused from outside, standing in
/// for local hardware too slow to keep up with the network side.
struct ThrottledDevice {
    inner: VirtualDevice,
    accept_writes: Arc<AtomicBool>,
}

impl SerialDevice for ThrottledDevice {
    fn open(name: &str) -> SerialResult<Self> {
        Ok(Self { inner: VirtualDevice::open(name)?, accept_writes: throttle_flag(name) })
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn set_config(&mut self, cfg: &SerialConfig) -> SerialResult<()> {
        self.inner.set_config(cfg)
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> SerialResult<isize> {
        self.inner.read_nonblocking(buf)
    }

    fn write_nonblocking(&mut self, buf: &[u8]) -> SerialResult<isize> {
        if self.accept_writes.load(Ordering::Acquire) {
            self.inner.write_nonblocking(buf)
        } else {
            Ok(-1)
        }
    }

    fn port_state(&self) -> SerialResult<(bool, bool)> {
        self.inner.port_state()
    }

    fn set_port_state(&mut self, dtr: bool, rts: bool) -> SerialResult<()> {
        self.inner.set_port_state(dtr, rts)
    }

    fn wait_events(&mut self, wait: bool) -> SerialResult<SerialEvent> {
        self.inner.wait_events(wait)
    }

    fn abort_wait(&self) {
        self.inner.abort_wait();
    }

    fn current_config(&self) -> SerialResult<SerialConfig> {
        self.inner.current_config()
    }
}

#[test]
fn back_pressure_engages_and_releases() {
    let (a_stream, b_stream) = connected_pair();
    let a = LinkHandler::<VirtualDevice>::spawn(a_stream).unwrap();
    let b = LinkHandler::<ThrottledDevice>::spawn(b_stream).unwrap();

    let a_endpoint = VirtualEndpoint::named("/dev/it-4-a");
    assert!(a.open_local_port("/dev/it-4-a"));

    let throttle = throttle_flag("/dev/it-4-b");
    throttle.store(false, Ordering::Release);
    assert!(b.open_local_port("/dev/it-4-b"));

    // Push enough bytes through A that B's ring (capacity 512) grows past
    // the 384-byte back-pressure threshold while B cannot drain it.
    a_endpoint.push_to_link(&[0xABu8; 400]);
    poll_until(Instant::now() + Duration::from_secs(3), || a_endpoint.pending_to_link() == 0);

    // Give B's RX/TX threads a moment to notice the occupancy and send
    // FLOW_CONTROL(0), and A's RX thread a moment to apply it.
    thread::sleep(Duration::from_millis(500));

    a_endpoint.push_to_link(&[0xCDu8; 20]);
    thread::sleep(Duration::from_millis(500));
    assert_eq!(a_endpoint.pending_to_link(), 20, "A should have paused reading under back-pressure");

    throttle.store(true, Ordering::Release);
    let resumed = poll_until(Instant::now() + Duration::from_secs(3), || a_endpoint.pending_to_link() == 0);
    assert!(resumed, "A should resume forwarding once B releases back-pressure");
}

// ---- scenario 5 ----

#[test]
fn magic_mismatch_tears_the_link_down() {
    let (a_stream, mut b_stream) = connected_pair();
    let a = LinkHandler::<VirtualDevice>::spawn(a_stream).unwrap();

    b_stream.write_all(b"XXXXXXX").unwrap();

    let torn_down = poll_until(Instant::now() + Duration::from_secs(2), || !a.is_alive());
    assert!(torn_down);
    a.join();
}

// ---- scenario 6 ----

#[test]
fn handshake_timeout_leaves_transport_alive() {
    let (a_stream, _b_stream) = connected_pair();
    let a = LinkHandler::<VirtualDevice>::spawn(a_stream).unwrap();

    let start = Instant::now();
    let ok = a.open_remote_port("/dev/nope");
    assert!(!ok);
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert!(a.is_alive());
}
