//! Application callbacks

use crate::{control::SetupPacket, Driver};

/// Application hooks, invoked from the interrupt handler
///
/// Every method has a default that does nothing. Each receives the driver, so
/// that an implementation can start the next transfer, or configure
/// endpoints, right away. Don't try to reach the driver through the
/// [`BusAdapter`](crate::BusAdapter) from a callback; it's already borrowed.
///
/// `()` implements `Callbacks` for devices that only need the driver.
#[allow(unused_variables)]
pub trait Callbacks<R> {
    /// The host reset the bus
    ///
    /// Endpoint 0 is configured and ready for a SETUP packet. All other
    /// endpoints are unconfigured, and every transfer was dropped.
    fn on_bus_reset(&mut self, driver: &mut Driver<R>) {}

    /// Start of frame, once per millisecond
    fn on_start_of_frame(&mut self, driver: &mut Driver<R>) {}

    /// The host sent a standard SET_CONFIGURATION request
    ///
    /// Called after [`on_setup`](Callbacks::on_setup).
    fn on_set_configuration(&mut self, driver: &mut Driver<R>, configuration: u8) {}

    /// The host sent a standard SET_INTERFACE request
    ///
    /// Called after [`on_setup`](Callbacks::on_setup) with the current
    /// configuration value.
    fn on_set_interface(&mut self, driver: &mut Driver<R>, configuration: u8, interface: u8) {}

    /// An OUT transfer completed on a non-zero endpoint
    ///
    /// `len` is the number of bytes written into `buffer`.
    fn on_endpoint_received(
        &mut self,
        driver: &mut Driver<R>,
        endpoint: usize,
        buffer: &'static mut [u8],
        len: usize,
    ) {
    }

    /// An IN transfer completed on a non-zero endpoint
    fn on_endpoint_sent(
        &mut self,
        driver: &mut Driver<R>,
        endpoint: usize,
        buffer: &'static [u8],
    ) {
    }

    /// A SETUP packet arrived on endpoint 0
    ///
    /// Start the data stage with [`send`](Driver::send) or
    /// [`receive`](Driver::receive) on endpoint 0, or send a zero length
    /// packet for the status stage. If endpoint 0 isn't receiving when this
    /// returns, it's prepared for the next SETUP packet.
    fn on_setup(&mut self, driver: &mut Driver<R>, setup: &SetupPacket) {}

    /// An IN transfer completed on endpoint 0
    fn on_control_in(&mut self, driver: &mut Driver<R>, buffer: &'static [u8]) {}

    /// An OUT transfer completed on endpoint 0
    ///
    /// `buffer` is `None` when the data landed in the SETUP packet buffer,
    /// which is usually a zero length status stage.
    fn on_control_out(
        &mut self,
        driver: &mut Driver<R>,
        buffer: Option<&'static mut [u8]>,
        len: usize,
    ) {
    }
}

impl<R> Callbacks<R> for () {}
