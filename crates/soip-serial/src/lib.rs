mod com;
mod config;
mod device;
mod error;
mod virtual_device;

pub use com::ComDevice;
pub use config::{FlowControl, Parity, SerialConfig, StopBits};
pub use device::{SerialDevice, SerialEvent};
pub use error::{Result, SerialError};
pub use virtual_device::{VirtualDevice, VirtualEndpoint};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_device_loopback_to_link() {
        let (mut device, endpoint) = VirtualDevice::open_paired();
        endpoint.push_to_link(b"hello");

        let mut buf = [0u8; 16];
        let n = device.read_nonblocking(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");

        let n = device.read_nonblocking(&mut buf).unwrap();
        assert_eq!(n, -1);
    }

    #[test]
    fn virtual_device_loopback_from_link() {
        let (mut device, endpoint) = VirtualDevice::open_paired();
        let n = device.write_nonblocking(b"world").unwrap();
        assert_eq!(n, 5);
        assert_eq!(endpoint.drain_from_link(), b"world");
    }

    #[test]
    fn virtual_device_closed_reports_minus_two() {
        let (mut device, _endpoint) = VirtualDevice::open_paired();
        device.close();
        assert!(!device.is_open());
        let mut buf = [0u8; 8];
        assert_eq!(device.read_nonblocking(&mut buf).unwrap(), -2);
        assert_eq!(device.write_nonblocking(b"x").unwrap(), -2);
    }

    #[test]
    fn virtual_device_config_change_fires_event() {
        let (mut device, endpoint) = VirtualDevice::open_paired();
        endpoint.set_config(SerialConfig { baud_rate: 115_200, ..SerialConfig::default() });
        let ev = device.wait_events(false).unwrap();
        assert_eq!(ev, SerialEvent::ConfigChanged);
        assert_eq!(endpoint.config().baud_rate, 115_200);
    }

    #[test]
    fn virtual_device_abort_wait_wakes_blocked_waiter() {
        let (mut device, _endpoint) = VirtualDevice::open_paired();
        let aborter = device.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            aborter.abort_wait();
        });
        let ev = device.wait_events(true).unwrap();
        assert_eq!(ev, SerialEvent::Aborted);
        handle.join().unwrap();
    }

    #[test]
    fn opening_the_same_name_twice_connects_to_the_same_virtual_wire() {
        let endpoint = VirtualEndpoint::named("/dev/soip-test-named");
        let mut device = VirtualDevice::open("/dev/soip-test-named").unwrap();

        endpoint.push_to_link(b"hi");
        let mut buf = [0u8; 8];
        let n = device.read_nonblocking(&mut buf).unwrap();
        assert_eq!(&buf[..n as usize], b"hi");
    }

    #[test]
    fn stop_bits_wire_codes_round_trip() {
        for sb in [StopBits::One, StopBits::OneHalf, StopBits::Two] {
            assert_eq!(StopBits::from_code(sb.to_code()).unwrap(), sb);
        }
    }

    #[test]
    fn parity_wire_codes_round_trip() {
        for p in [Parity::None, Parity::Odd, Parity::Even, Parity::Mark, Parity::Space] {
            assert_eq!(Parity::from_code(p.to_code()).unwrap(), p);
        }
    }

    #[test]
    fn flow_control_wire_codes_round_trip() {
        for fc in [FlowControl::None, FlowControl::XonXoff, FlowControl::RtsCts, FlowControl::DsrDtr] {
            assert_eq!(FlowControl::from_code(fc.to_code()).unwrap(), fc);
        }
    }
}
