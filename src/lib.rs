//! A USB device transport for STM32 processors with packet memory
//!
//! `stm32-usbd-transport` drives the full-speed USB device peripheral found on
//! STM32L0-class processors: the one with eight bidirectional endpoints and a
//! dedicated packet memory. It moves whole transfers. You hand the driver a
//! buffer, and it splits the buffer into packets, or reassembles packets into
//! the buffer, and tells you when the transfer is done. Transfers end with a
//! short packet, as USB requires.
//!
//! It's not a USB stack. Descriptors, enumeration and class behavior belong
//! to your [`Callbacks`].
//!
//! To interface the library, you must define a safe implementation of
//! [`Peripherals`]. See the peripherals documentation for more information.
//!
//! # Usage
//!
//! 1. Turn on the USB and CRS clocks, and the 48MHz oscillator.
//! 2. Create a [`Driver`], and [`initialize()`](Driver::initialize) it.
//! 3. Wrap the driver, and your [`Callbacks`], in a [`BusAdapter`].
//! 4. [`enable()`](BusAdapter::enable) the bus adapter, and call
//!    [`on_interrupt()`](BusAdapter::on_interrupt) from the USB interrupt.
//!
//! # Features
//!
//! - `log` logs driver events through the `log` crate.
//! - `defmt-03` implements `defmt` 0.3 formatting for `usb-device` types.

#![no_std]

#[macro_use]
mod log;

mod bdt;
mod buffer;
mod bus;
mod callbacks;
mod control;
mod driver;
mod endpoint;
mod interrupt;
pub mod ral;

#[cfg(test)]
mod sim;

pub use bus::BusAdapter;
pub use callbacks::Callbacks;
pub use control::{Control, SetupPacket, Stage, Token};
pub use driver::{Config, Driver, Faults};
pub use endpoint::{toggle_write, Direction, Status, EPREG_MASK};
pub use interrupt::{dispatch, Interrupts};
pub use usb_device::{endpoint::EndpointType, UsbError};

/// Eight endpoints, each with an IN and an OUT direction
const ENDPOINT_COUNT: usize = 8;

/// A type that owns the USB register blocks and packet memory
///
/// An implementation of `Peripherals` is expected to own
///
/// - USB registers
/// - CRS (clock recovery system) registers
/// - USB packet memory
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the
/// various register blocks required for all USB operation. The pointers
/// returned by the methods are assumed to be valid, and will be cast to a
/// register definition.
///
/// # Example
///
/// A safe implementation of `Peripherals` for an STM32L0.
///
/// ```
/// use stm32_usbd_transport::Peripherals;
///
/// struct Instances {
///     _private: (),
/// }
///
/// impl Instances {
///     /// # Safety
///     ///
///     /// Only call this once.
///     pub unsafe fn new() -> Self {
///         Instances { _private: () }
///     }
/// }
///
/// unsafe impl Peripherals for Instances {
///     fn usb(&self) -> *const () {
///         0x4000_5C00 as _
///     }
///     fn crs(&self) -> *const () {
///         0x4000_6C00 as _
///     }
///     fn packet_memory(&self) -> *const () {
///         0x4000_6000 as _
///     }
/// }
///
/// let instances = unsafe { Instances::new() };
/// assert_eq!(instances.usb(), 0x4000_5C00 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB registers
    fn usb(&self) -> *const ();
    /// Returns the address of the CRS registers
    fn crs(&self) -> *const ();
    /// Returns the address of USB packet memory, as the CPU sees it
    fn packet_memory(&self) -> *const ();
}

/// Register-level access to the USB peripheral
///
/// [`ral::Instances`] implements this for real hardware. Each method is a
/// single register access, except where noted.
pub trait Controller {
    /// Read the interrupt status register
    fn read_istr(&self) -> u16;
    /// Write the interrupt status register
    ///
    /// Flags written with zero are cleared; flags written with one are
    /// unchanged.
    fn write_istr(&self, value: u16);
    /// Write the control register
    fn write_cntr(&self, value: u16);
    /// Read an endpoint register
    fn read_endpoint(&self, index: usize) -> u16;
    /// Write an endpoint register
    ///
    /// Toggle bits flip when written with one. Transfer complete flags are
    /// cleared when written with zero.
    fn write_endpoint(&self, index: usize, value: u16);
    /// Write the device address register
    fn write_daddr(&self, value: u16);
    /// Write the buffer descriptor table address
    fn write_btable(&self, offset: u16);
    /// Enable or disable the D+ pull-up
    ///
    /// Read-modify-write.
    fn set_pullup(&self, enable: bool);
    /// Enable or disable clock recovery, with automatic trimming
    ///
    /// Read-modify-write.
    fn set_clock_recovery(&self, enable: bool);
    /// Read the packet memory halfword at byte `offset`
    fn read_packet_memory(&self, offset: u16) -> u16;
    /// Write the packet memory halfword at byte `offset`
    fn write_packet_memory(&self, offset: u16, value: u16);
}
