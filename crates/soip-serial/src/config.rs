use crate::error::{Result, SerialError};

/// Stop bit widths, wire-coded as `1=One, 2=OneHalf, 3=Two`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    OneHalf,
    Two,
}

impl StopBits {
    #[must_use]
    pub const fn to_code(self) -> u32 {
        match self {
            Self::One => 1,
            Self::OneHalf => 2,
            Self::Two => 3,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(Self::One),
            2 => Ok(Self::OneHalf),
            3 => Ok(Self::Two),
            other => Err(SerialError::UnsupportedConfig(format!("stop_bits code {other}"))),
        }
    }
}

/// Parity mode, wire-coded as `1=None, 2=Odd, 3=Even, 4=Mark, 5=Space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    #[must_use]
    pub const fn to_code(self) -> u32 {
        match self {
            Self::None => 1,
            Self::Odd => 2,
            Self::Even => 3,
            Self::Mark => 4,
            Self::Space => 5,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(Self::None),
            2 => Ok(Self::Odd),
            3 => Ok(Self::Even),
            4 => Ok(Self::Mark),
            5 => Ok(Self::Space),
            other => Err(SerialError::UnsupportedConfig(format!("parity code {other}"))),
        }
    }
}

/// Flow control discipline, wire-coded as `1=None, 2=XonXoff, 3=RtsCts, 4=DsrDtr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    XonXoff,
    RtsCts,
    DsrDtr,
}

impl FlowControl {
    #[must_use]
    pub const fn to_code(self) -> u32 {
        match self {
            Self::None => 1,
            Self::XonXoff => 2,
            Self::RtsCts => 3,
            Self::DsrDtr => 4,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(Self::None),
            2 => Ok(Self::XonXoff),
            3 => Ok(Self::RtsCts),
            4 => Ok(Self::DsrDtr),
            other => Err(SerialError::UnsupportedConfig(format!("flow_control code {other}"))),
        }
    }
}

/// Line configuration for a serial device. Travels on the wire as a fixed
/// 17-byte `CONFIGURE_PORT` payload (encoding lives in `soip-link::protocol`;
/// this type is the in-memory shape both ends agree on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub xon_char: u8,
    pub xoff_char: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            xon_char: 0x11,
            xoff_char: 0x13,
        }
    }
}
