use crate::config::SerialConfig;
use crate::error::Result;

/// What woke a call to [`SerialDevice::wait_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialEvent {
    /// DSR/CTS (or, for a virtual device, the attached application's
    /// configuration) changed.
    LineStateChanged,
    /// New bytes are available to read.
    DataReceived,
    /// A previously pending write has drained.
    TransmitDrained,
    /// The configuration was changed externally (VCOM only).
    ConfigChanged,
    /// `wait` was false, or the wait timed out with nothing to report.
    Idle,
    /// `abort_wait` was called.
    Aborted,
}

/// A local serial endpoint, abstracted so `soip-link` can drive either a
/// real hardware port or an in-process virtual one identically.
///
/// `read_nonblocking`/`write_nonblocking` return `isize`: `-1` means the
/// operation is pending (would block), `-2` means the port is closed, and
/// any non-negative value is a byte count.
pub trait SerialDevice: Send {
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn set_config(&mut self, cfg: &SerialConfig) -> Result<()>;

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<isize>;

    fn write_nonblocking(&mut self, buf: &[u8]) -> Result<isize>;

    /// Returns `(dsr, cts)`.
    fn port_state(&self) -> Result<(bool, bool)>;

    fn set_port_state(&mut self, dtr: bool, rts: bool) -> Result<()>;

    fn wait_events(&mut self, wait: bool) -> Result<SerialEvent>;

    /// Unblocks a concurrent `wait_events` call. Safe to call from any
    /// thread, including while no wait is in progress.
    fn abort_wait(&self);

    /// The configuration currently in effect. For a VCOM device this
    /// reflects whatever the attached application last set, independent of
    /// `set_config` (which is a no-op there); used by `LinkHandler` to push
    /// a fresh `CONFIGURE_PORT` frame when a `ConfigChanged` event fires.
    fn current_config(&self) -> Result<SerialConfig>;
}
