//! USB transfer engine
//!
//! The driver owns the endpoint transfer state, the buffer descriptor table,
//! and the packet memory allocator. It doesn't know about interrupts or
//! callbacks; see [`dispatch`](crate::dispatch) for that.

use crate::{
    bdt::{self, DescriptorTable},
    buffer::{self, Allocator},
    endpoint::{self, Direction, Endpoint, Rx, RxBuffer, Status, Tx},
    ral::{endpoint::EPR, usb},
    Controller, ENDPOINT_COUNT,
};
use usb_device::{endpoint::EndpointType, UsbError};

/// Size of a SETUP packet
pub const SETUP_PACKET_SIZE: usize = 8;

/// Driver configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Max packet size for endpoint 0
    ///
    /// Must be 8, 16, 32 or 64 for a full speed device.
    pub control_packet_size: u16,
    /// Packet memory size, in bytes
    pub packet_memory_size: u16,
    /// Packet memory address of the buffer descriptor table
    ///
    /// Must be 8-byte aligned. Buffers are allocated after the table.
    pub btable: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            control_packet_size: 64,
            packet_memory_size: 1024,
            btable: 0,
        }
    }
}

/// Bus faults counted by the interrupt handler
///
/// The counters wrap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    /// Transaction errors: CRC, bit stuffing, framing, timeouts
    pub errors: u32,
    /// Packet memory overruns and underruns
    pub packet_memory_overruns: u32,
}

/// A USB driver
///
/// After you create a `Driver` with [`new()`](Driver::new), call
/// [`initialize()`](Driver::initialize) once, then [`enable()`](Driver::enable)
/// to attach to the bus. Endpoint 0 is configured by every bus reset.
pub struct Driver<R> {
    controller: R,
    config: Config,
    bdt: DescriptorTable,
    allocator: Allocator,
    endpoints: [Endpoint; ENDPOINT_COUNT],
    /// Landing buffer for SETUP packets
    setup: [u8; SETUP_PACKET_SIZE],
    faults: Faults,
}

impl Driver<crate::ral::Instances> {
    /// Create a driver for the USB peripheral owned by `peripherals`
    pub fn with_peripherals<P: crate::Peripherals>(peripherals: P, config: Config) -> Self {
        Driver::new(crate::ral::instances(peripherals), config)
    }
}

impl<R: Controller> Driver<R> {
    /// Create a new `Driver`
    ///
    /// Creation doesn't touch the hardware.
    pub fn new(controller: R, config: Config) -> Self {
        debug_assert!(config.btable % 8 == 0, "BTABLE must be 8-byte aligned");
        debug_assert!(
            config.btable + bdt::TABLE_SIZE <= config.packet_memory_size,
            "Buffer descriptor table must fit in packet memory"
        );
        debug_assert!(matches!(config.control_packet_size, 8 | 16 | 32 | 64));
        Driver {
            controller,
            config,
            bdt: DescriptorTable::new(config.btable),
            allocator: Allocator::new(
                config.btable + bdt::TABLE_SIZE,
                config.packet_memory_size,
            ),
            endpoints: Default::default(),
            setup: [0; SETUP_PACKET_SIZE],
            faults: Faults::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The hardware behind this driver
    pub fn controller(&self) -> &R {
        &self.controller
    }

    /// Bus faults observed since the driver was created
    pub fn faults(&self) -> Faults {
        self.faults
    }

    pub(crate) fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    /// Take the peripheral out of power down, and hold it in reset
    ///
    /// Assumes that the USB and CRS clocks are running, and the 48MHz
    /// clock is stable.
    pub fn initialize(&mut self) {
        self.controller.write_cntr(usb::CNTR::FRES::mask);
        self.controller.write_istr(0);
        self.controller.write_btable(self.bdt.base());
    }

    /// Connect to the bus
    ///
    /// Resets the peripheral, enables the D+ pull-up, and waits for the host
    /// to reset the bus.
    pub fn enable(&mut self) {
        self.controller.write_cntr(usb::CNTR::FRES::mask);
        self.controller.set_pullup(true);
        self.controller.write_istr(0);
        self.controller.write_cntr(usb::CNTR::RESETM::mask);
        debug!("ENABLE");
    }

    /// Disconnect from the bus, and power down the peripheral
    pub fn disable(&mut self) {
        self.controller.write_cntr(usb::CNTR::FRES::mask);
        self.controller.write_istr(0);
        self.controller.write_cntr(
            usb::CNTR::FRES::mask | usb::CNTR::LPMODE::mask | usb::CNTR::PDWN::mask,
        );
        self.controller.set_pullup(false);
        self.controller.set_clock_recovery(false);
        debug!("DISABLE");
    }

    /// Reset every endpoint, and prepare endpoint 0 for the next SETUP packet
    ///
    /// This discards all packet memory allocations and every transfer in
    /// progress, without notifying anyone. Calling it twice in a row has the
    /// same effect as calling it once.
    pub fn bus_reset(&mut self) {
        self.reset_with(|_| {});
    }

    /// Bus reset, running `hook` before interrupts are enabled
    pub(crate) fn reset_with(&mut self, hook: impl FnOnce(&mut Self)) {
        self.controller.write_istr(0);
        self.controller.set_clock_recovery(true);
        self.controller.write_btable(self.bdt.base());

        self.bdt.clear(&self.controller);
        self.endpoints = Default::default();
        self.allocator.reset();

        let control_packet_size = self.config.control_packet_size;
        if let Err(err) = self
            .configure_endpoint(0, 0, control_packet_size, EndpointType::Control)
            .and_then(|_| self.arm_setup())
        {
            warn!("EP0 CONFIGURE FAILED {:?}", err);
        }

        hook(self);

        self.controller.write_cntr(
            usb::CNTR::CTRM::mask
                | usb::CNTR::RESETM::mask
                | usb::CNTR::SOFM::mask
                | usb::CNTR::ERRM::mask
                | usb::CNTR::PMAOVRM::mask,
        );
        self.controller.write_daddr(usb::DADDR::EF::mask);
        debug!("RESET");
    }

    /// Set the device address, keeping the function enabled
    pub fn set_address(&mut self, address: u8) {
        self.controller
            .write_daddr(usb::DADDR::EF::mask | (u16::from(address) & usb::DADDR::ADD::mask));
        debug!("ADDRESS {}", address);
    }

    /// Configure an endpoint's type, address and max packet size
    ///
    /// No packet memory is allocated until the endpoint is used, but the
    /// memory is set aside here: `EndpointMemoryOverflow` means that there
    /// isn't enough packet memory for a transfer in both directions.
    ///
    /// Reconfiguring an endpoint with a larger packet size cancels its
    /// transfers, without notification.
    pub fn configure_endpoint(
        &mut self,
        endpoint: usize,
        address: u8,
        packet_size: u16,
        kind: EndpointType,
    ) -> Result<(), UsbError> {
        if endpoint >= ENDPOINT_COUNT {
            return Err(UsbError::InvalidEndpoint);
        }
        let type_bits = endpoint::type_bits(kind).ok_or(UsbError::Unsupported)?;
        if packet_size == 0 || packet_size > bdt::MAX_PACKET_SIZE {
            return Err(UsbError::InvalidEndpoint);
        }

        if packet_size > self.endpoints[endpoint].packet_size {
            let (_, capacity) = bdt::rx_block_count(packet_size);
            self.allocator.reserve(packet_size + capacity)?;
            // Stop the peripheral before its buffers go away.
            self.write_status(endpoint, Direction::In, Status::Disabled);
            self.write_status(endpoint, Direction::Out, Status::Disabled);
            let ep = &mut self.endpoints[endpoint];
            ep.tx = Tx::Idle;
            ep.rx = Rx::Idle;
            self.bdt.set_tx_addr(&self.controller, endpoint, 0);
            self.bdt.set_rx_addr(&self.controller, endpoint, 0);
        }
        self.endpoints[endpoint].packet_size = packet_size;

        // Writing ones to CTR_* and zeros to the toggle bits leaves them alone.
        self.controller.write_endpoint(
            endpoint,
            EPR::CTR_RX::mask
                | EPR::CTR_TX::mask
                | type_bits
                | (u16::from(address) & EPR::EA::mask),
        );
        debug!("EP{} CONFIGURE {} {}", endpoint, address, packet_size);
        Ok(())
    }

    fn check_configured(&self, endpoint: usize) -> Result<(), UsbError> {
        match self.endpoints.get(endpoint) {
            None => Err(UsbError::InvalidEndpoint),
            Some(ep) if ep.packet_size == 0 => Err(UsbError::InvalidState),
            Some(_) => Ok(()),
        }
    }

    /// Set the status of one direction of an endpoint
    pub fn set_status(
        &mut self,
        endpoint: usize,
        direction: Direction,
        status: Status,
    ) -> Result<(), UsbError> {
        if endpoint >= ENDPOINT_COUNT {
            return Err(UsbError::InvalidEndpoint);
        }
        self.write_status(endpoint, direction, status);
        Ok(())
    }

    /// Read the status of one direction of an endpoint
    pub fn status(&self, endpoint: usize, direction: Direction) -> Result<Status, UsbError> {
        if endpoint >= ENDPOINT_COUNT {
            return Err(UsbError::InvalidEndpoint);
        }
        let epr = self.controller.read_endpoint(endpoint);
        Ok(Status::from_register(epr, direction))
    }

    fn write_status(&self, endpoint: usize, direction: Direction, status: Status) {
        let current = self.controller.read_endpoint(endpoint);
        self.controller.write_endpoint(
            endpoint,
            endpoint::toggle_write(current, status.bits(direction), direction.stat_mask()),
        );
    }

    /// Stall, or un-stall, one direction of an endpoint
    ///
    /// Un-stalling resumes a transfer in progress. Otherwise, the endpoint
    /// NAKs until the next transfer.
    pub fn set_stalled(
        &mut self,
        endpoint: usize,
        direction: Direction,
        stalled: bool,
    ) -> Result<(), UsbError> {
        if endpoint >= ENDPOINT_COUNT {
            return Err(UsbError::InvalidEndpoint);
        }
        let status = if stalled {
            Status::Stall
        } else if self.is_idle(endpoint, direction) {
            Status::Nak
        } else {
            Status::Valid
        };
        self.write_status(endpoint, direction, status);
        Ok(())
    }

    pub fn is_stalled(&self, endpoint: usize, direction: Direction) -> bool {
        self.status(endpoint, direction) == Ok(Status::Stall)
    }

    fn is_idle(&self, endpoint: usize, direction: Direction) -> bool {
        match direction {
            Direction::In => self.is_tx_idle(endpoint),
            Direction::Out => self.is_rx_idle(endpoint),
        }
    }

    /// `true` if there's no IN transfer in progress on `endpoint`
    pub fn is_tx_idle(&self, endpoint: usize) -> bool {
        self.endpoints
            .get(endpoint)
            .map_or(true, |ep| matches!(ep.tx, Tx::Idle))
    }

    /// `true` if there's no OUT transfer in progress on `endpoint`
    pub fn is_rx_idle(&self, endpoint: usize) -> bool {
        self.endpoints
            .get(endpoint)
            .map_or(true, |ep| matches!(ep.rx, Rx::Idle))
    }

    /// The endpoint's transmit buffer address, allocated on first use
    fn tx_buffer(&mut self, endpoint: usize) -> Result<u16, UsbError> {
        let address = self.bdt.tx_addr(&self.controller, endpoint);
        if address != 0 {
            return Ok(address);
        }
        let address = self
            .allocator
            .allocate(self.endpoints[endpoint].packet_size)?;
        self.bdt.set_tx_addr(&self.controller, endpoint, address);
        trace!("EP{} TX BUFFER {}", endpoint, address);
        Ok(address)
    }

    /// The endpoint's receive buffer address, allocated on first use
    fn rx_buffer(&mut self, endpoint: usize) -> Result<u16, UsbError> {
        let address = self.bdt.rx_addr(&self.controller, endpoint);
        if address != 0 {
            return Ok(address);
        }
        let (_, capacity) = bdt::rx_block_count(self.endpoints[endpoint].packet_size);
        let address = self.allocator.allocate(capacity)?;
        self.bdt.set_rx_addr(&self.controller, endpoint, address);
        trace!("EP{} RX BUFFER {}", endpoint, address);
        Ok(address)
    }

    /// Start sending `buffer` to the host, or cancel with `None`
    ///
    /// A transfer in progress is abandoned without notification, and its
    /// buffer is returned. The transfer ends with a packet shorter than the
    /// max packet size, so a buffer that's a multiple of the max packet size
    /// (including an empty buffer) ends with a zero length packet.
    ///
    /// If the host already took a packet of the abandoned transfer, and that
    /// completion hasn't been handled yet, the new transfer's first packet
    /// may be reported as sent on that acknowledgement.
    pub fn send(
        &mut self,
        endpoint: usize,
        buffer: Option<&'static [u8]>,
    ) -> Result<Option<&'static [u8]>, UsbError> {
        self.check_configured(endpoint)?;
        if buffer.is_some() {
            self.tx_buffer(endpoint)?;
        }

        let previous = self.endpoints[endpoint].tx.take();
        match buffer {
            Some(buffer) => {
                self.endpoints[endpoint].tx = Tx::Active { buffer, sent: 0 };
                self.send_next_packet(endpoint);
            }
            None => self.write_status(endpoint, Direction::In, Status::Disabled),
        }
        Ok(previous)
    }

    /// Queue the next packet of the transfer
    fn send_next_packet(&mut self, endpoint: usize) {
        let ep = &mut self.endpoints[endpoint];
        let Tx::Active { buffer, sent } = ep.tx else {
            return;
        };
        let packet_size = usize::from(ep.packet_size);
        let remaining = &buffer[sent..];
        let len = remaining.len().min(packet_size);

        ep.tx = if len == packet_size {
            Tx::Active {
                buffer,
                sent: sent + len,
            }
        } else {
            Tx::Finishing { buffer }
        };

        let address = self.bdt.tx_addr(&self.controller, endpoint);
        buffer::copy_in(&self.controller, &remaining[..len], address);
        self.bdt.set_tx_count(&self.controller, endpoint, len as u16);
        self.write_status(endpoint, Direction::In, Status::Valid);
        trace!("EP{} IN {}", endpoint, len);
    }

    /// Handle an acknowledged IN packet
    ///
    /// Returns the transfer's buffer once the host has taken the final
    /// packet.
    pub(crate) fn transmit_complete(&mut self, endpoint: usize) -> Option<&'static [u8]> {
        match self.endpoints[endpoint].tx {
            Tx::Idle => None,
            Tx::Active { .. } => {
                self.send_next_packet(endpoint);
                None
            }
            Tx::Finishing { .. } => self.endpoints[endpoint].tx.take(),
        }
    }

    /// Start receiving into `buffer`, or cancel with `None`
    ///
    /// A transfer in progress is abandoned without notification, and its
    /// buffer is returned. The transfer completes on the first packet shorter
    /// than the max packet size. Data that doesn't fit in `buffer` is
    /// dropped.
    pub fn receive(
        &mut self,
        endpoint: usize,
        buffer: Option<&'static mut [u8]>,
    ) -> Result<Option<&'static mut [u8]>, UsbError> {
        self.check_configured(endpoint)?;
        if buffer.is_some() {
            self.rx_buffer(endpoint)?;
        }

        let previous = self.endpoints[endpoint].rx.take();
        match buffer {
            Some(buffer) => self.begin_receive(endpoint, RxBuffer::Data(buffer)),
            None => self.write_status(endpoint, Direction::Out, Status::Disabled),
        }
        Ok(match previous {
            Some(RxBuffer::Data(buffer)) => Some(buffer),
            _ => None,
        })
    }

    /// Prepare endpoint 0 for the next SETUP packet
    pub(crate) fn arm_setup(&mut self) -> Result<(), UsbError> {
        self.check_configured(0)?;
        self.rx_buffer(0)?;
        self.endpoints[0].rx = Rx::Idle;
        self.begin_receive(0, RxBuffer::Setup);
        Ok(())
    }

    fn begin_receive(&mut self, endpoint: usize, buffer: RxBuffer) {
        self.endpoints[endpoint].rx = Rx::Active {
            buffer,
            received: 0,
        };
        self.begin_packet_receive(endpoint);
    }

    fn begin_packet_receive(&mut self, endpoint: usize) {
        let (blocks, _) = bdt::rx_block_count(self.endpoints[endpoint].packet_size);
        self.bdt.set_rx_blocks(&self.controller, endpoint, blocks);
        self.write_status(endpoint, Direction::Out, Status::Valid);
    }

    /// Handle a received OUT packet
    ///
    /// Returns the transfer's buffer, and the number of bytes written into
    /// it, once the transfer completes. Otherwise, prepares for the next
    /// packet.
    pub(crate) fn receive_complete(&mut self, endpoint: usize) -> Option<(RxBuffer, usize)> {
        let count = self.bdt.rx_count(&self.controller, endpoint);
        let address = self.bdt.rx_addr(&self.controller, endpoint);
        let packet_size = self.endpoints[endpoint].packet_size;

        let Rx::Active { buffer, received } = &mut self.endpoints[endpoint].rx else {
            return None;
        };
        let dst: &mut [u8] = match buffer {
            RxBuffer::Setup => &mut self.setup[..],
            RxBuffer::Data(data) => &mut data[..],
        };
        let start = (*received).min(dst.len());
        let len = usize::from(count).min(dst.len() - start);
        buffer::copy_out(&self.controller, address, &mut dst[start..start + len]);
        *received = start + len;
        trace!("EP{} OUT {}", endpoint, count);

        if count != packet_size {
            let received = *received;
            return self.endpoints[endpoint]
                .rx
                .take()
                .map(|buffer| (buffer, received));
        }
        self.begin_packet_receive(endpoint);
        None
    }

    /// Copy a SETUP packet out of endpoint 0's receive buffer
    ///
    /// A SETUP packet aborts any control transfer in progress, so this drops
    /// endpoint 0's transfer state in both directions.
    pub(crate) fn receive_setup(&mut self) -> [u8; SETUP_PACKET_SIZE] {
        let count = usize::from(self.bdt.rx_count(&self.controller, 0)).min(SETUP_PACKET_SIZE);
        let address = self.bdt.rx_addr(&self.controller, 0);
        let mut packet = [0; SETUP_PACKET_SIZE];
        if address != 0 {
            buffer::copy_out(&self.controller, address, &mut packet[..count]);
        }
        self.setup = packet;

        let ep = &mut self.endpoints[0];
        if matches!(
            ep.rx,
            Rx::Active {
                buffer: RxBuffer::Data(_),
                ..
            }
        ) || !matches!(ep.tx, Tx::Idle)
        {
            debug!("EP0 ABORT");
        }
        ep.rx = Rx::Idle;
        ep.tx = Tx::Idle;
        packet
    }
}
