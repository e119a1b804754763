//! Endpoint registers and per-endpoint transfer state

use crate::ral::endpoint::EPR;
use usb_device::endpoint::EndpointType;

/// Endpoint register bits that read back as their current value, and
/// that are safe to write back unchanged.
///
/// The CTR bits are cleared by writing zero, so writing back a one leaves them
/// alone. Every toggle bit (DTOG, STAT) is outside of this mask.
pub const EPREG_MASK: u16 = EPR::CTR_RX::mask
    | EPR::SETUP::mask
    | EPR::EP_TYPE::mask
    | EPR::EP_KIND::mask
    | EPR::CTR_TX::mask
    | EPR::EA::mask;

/// Compute the value to write into an endpoint register so that the toggle
/// bits in `mask` read back as `desired & mask`
///
/// Toggle bits flip when written with a one. Everything else that's in
/// [`EPREG_MASK`] is written back with its current value.
pub const fn toggle_write(current: u16, desired: u16, mask: u16) -> u16 {
    (current ^ (desired & mask)) & (EPREG_MASK | mask)
}

/// Transfer direction, from the host's perspective
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    /// The STAT field for this direction
    pub(crate) const fn stat_mask(self) -> u16 {
        match self {
            Direction::In => EPR::STAT_TX::mask,
            Direction::Out => EPR::STAT_RX::mask,
        }
    }

    const fn stat_offset(self) -> u16 {
        match self {
            Direction::In => EPR::STAT_TX::offset,
            Direction::Out => EPR::STAT_RX::offset,
        }
    }
}

/// Endpoint status, one per direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    /// The endpoint ignores all requests
    Disabled = 0b00,
    /// The endpoint responds with STALL
    Stall = 0b01,
    /// The endpoint responds with NAK
    Nak = 0b10,
    /// The endpoint accepts the next transaction
    Valid = 0b11,
}

impl Status {
    /// The STAT field value for `direction`
    pub(crate) const fn bits(self, direction: Direction) -> u16 {
        (self as u16) << direction.stat_offset()
    }

    /// Read this direction's status from an endpoint register value
    pub(crate) const fn from_register(epr: u16, direction: Direction) -> Self {
        match (epr & direction.stat_mask()) >> direction.stat_offset() {
            0b00 => Status::Disabled,
            0b01 => Status::Stall,
            0b10 => Status::Nak,
            _ => Status::Valid,
        }
    }
}

/// The EP_TYPE field value for an endpoint type
///
/// Returns `None` for isochronous endpoints, which aren't supported.
pub(crate) const fn type_bits(kind: EndpointType) -> Option<u16> {
    let bits = match kind {
        EndpointType::Bulk => 0b00,
        EndpointType::Control => 0b01,
        EndpointType::Interrupt => 0b11,
        EndpointType::Isochronous { .. } => return None,
    };
    Some(bits << EPR::EP_TYPE::offset)
}

/// Software state of an IN transfer
#[derive(Default)]
pub enum Tx {
    /// No transfer, or the transfer has been acknowledged
    #[default]
    Idle,
    /// Packets remain to be queued
    Active { buffer: &'static [u8], sent: usize },
    /// The short (or zero length) packet that terminates the transfer is
    /// queued, and we're waiting for the host to take it
    Finishing { buffer: &'static [u8] },
}

impl Tx {
    /// Drop the transfer, returning its buffer
    pub fn take(&mut self) -> Option<&'static [u8]> {
        match core::mem::take(self) {
            Tx::Idle => None,
            Tx::Active { buffer, .. } | Tx::Finishing { buffer } => Some(buffer),
        }
    }
}

/// Destination of an OUT transfer
pub enum RxBuffer {
    /// The driver's setup packet buffer, only used on endpoint 0
    Setup,
    /// A caller's buffer
    Data(&'static mut [u8]),
}

/// Software state of an OUT transfer
#[derive(Default)]
pub enum Rx {
    /// No transfer, or the transfer completed
    #[default]
    Idle,
    /// Waiting for more packets
    Active { buffer: RxBuffer, received: usize },
}

impl Rx {
    /// Drop the transfer, returning its buffer
    pub fn take(&mut self) -> Option<RxBuffer> {
        match core::mem::take(self) {
            Rx::Idle => None,
            Rx::Active { buffer, .. } => Some(buffer),
        }
    }
}

/// A USB endpoint
///
/// Tracks the logical transfer in each direction. The packet size is set when
/// the endpoint is configured, and zero until then.
#[derive(Default)]
pub struct Endpoint {
    pub packet_size: u16,
    pub tx: Tx,
    pub rx: Rx,
}
