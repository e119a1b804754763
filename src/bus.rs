//! Interrupt-safe access to the driver

use crate::{
    callbacks::Callbacks,
    control::Control,
    driver::{Driver, Faults},
    endpoint::Direction,
    interrupt, Controller,
};
use core::cell::RefCell;
use critical_section::Mutex;
use usb_device::{endpoint::EndpointType, UsbError};

struct Device<R, C> {
    driver: Driver<R>,
    control: Control,
    callbacks: C,
}

/// Shares the driver between the application and the USB interrupt
///
/// Every method runs in a critical section, so a foreground
/// [`send()`](BusAdapter::send) can't interleave with the interrupt handler.
/// Place the `BusAdapter` in a `static`, and call
/// [`on_interrupt()`](BusAdapter::on_interrupt) from the USB interrupt.
///
/// # Example
///
/// ```no_run
/// use stm32_usbd_transport::{BusAdapter, Callbacks, Config, Driver, Peripherals};
/// # struct Instances;
/// # unsafe impl Peripherals for Instances {
/// #     fn usb(&self) -> *const () { 0x4000_5C00 as _ }
/// #     fn crs(&self) -> *const () { 0x4000_6C00 as _ }
/// #     fn packet_memory(&self) -> *const () { 0x4000_6000 as _ }
/// # }
///
/// struct Loopback;
/// impl<R: stm32_usbd_transport::Controller> Callbacks<R> for Loopback {}
///
/// let mut driver = Driver::with_peripherals(Instances, Config::default());
/// driver.initialize();
/// let bus = BusAdapter::new(driver, Loopback);
/// bus.enable();
///
/// // In the USB interrupt handler:
/// bus.on_interrupt();
/// ```
pub struct BusAdapter<R, C> {
    device: Mutex<RefCell<Device<R, C>>>,
}

impl<R: Controller, C: Callbacks<R>> BusAdapter<R, C> {
    /// Wrap an initialized driver, and the application's callbacks
    pub fn new(driver: Driver<R>, callbacks: C) -> Self {
        BusAdapter {
            device: Mutex::new(RefCell::new(Device {
                driver,
                control: Control::new(),
                callbacks,
            })),
        }
    }

    /// Interrupt-safe, immutable access to the device
    fn with_device<T>(&self, func: impl FnOnce(&Device<R, C>) -> T) -> T {
        critical_section::with(|cs| {
            let device = self.device.borrow(cs);
            let device = device.borrow();
            func(&device)
        })
    }

    /// Interrupt-safe, mutable access to the device
    fn with_device_mut<T>(&self, func: impl FnOnce(&mut Device<R, C>) -> T) -> T {
        critical_section::with(|cs| {
            let device = self.device.borrow(cs);
            let mut device = device.borrow_mut();
            func(&mut device)
        })
    }

    /// Interrupt-safe access to the driver
    pub fn with_driver<T>(&self, func: impl FnOnce(&mut Driver<R>) -> T) -> T {
        self.with_device_mut(|device| func(&mut device.driver))
    }

    /// Interrupt-safe access to the callbacks
    pub fn with_callbacks<T>(&self, func: impl FnOnce(&mut C) -> T) -> T {
        self.with_device_mut(|device| func(&mut device.callbacks))
    }

    /// Handle USB interrupts
    ///
    /// # Panics
    ///
    /// Panics if a callback reaches back into this `BusAdapter`.
    pub fn on_interrupt(&self) {
        self.with_device_mut(|device| {
            let Device {
                driver,
                control,
                callbacks,
            } = device;
            interrupt::dispatch(driver, control, callbacks);
        });
    }

    /// Connect to the bus
    pub fn enable(&self) {
        self.with_driver(|driver| driver.enable());
    }

    /// Disconnect from the bus
    pub fn disable(&self) {
        self.with_device_mut(|device| {
            device.driver.disable();
            device.control.reset();
        });
    }

    /// See [`Driver::configure_endpoint`]
    pub fn configure_endpoint(
        &self,
        endpoint: usize,
        address: u8,
        packet_size: u16,
        kind: EndpointType,
    ) -> Result<(), UsbError> {
        self.with_driver(|driver| driver.configure_endpoint(endpoint, address, packet_size, kind))
    }

    /// See [`Driver::send`]
    pub fn send(
        &self,
        endpoint: usize,
        buffer: Option<&'static [u8]>,
    ) -> Result<Option<&'static [u8]>, UsbError> {
        self.with_driver(|driver| driver.send(endpoint, buffer))
    }

    /// See [`Driver::receive`]
    pub fn receive(
        &self,
        endpoint: usize,
        buffer: Option<&'static mut [u8]>,
    ) -> Result<Option<&'static mut [u8]>, UsbError> {
        self.with_driver(|driver| driver.receive(endpoint, buffer))
    }

    pub fn set_stalled(
        &self,
        endpoint: usize,
        direction: Direction,
        stalled: bool,
    ) -> Result<(), UsbError> {
        self.with_driver(|driver| driver.set_stalled(endpoint, direction, stalled))
    }

    pub fn is_stalled(&self, endpoint: usize, direction: Direction) -> bool {
        self.with_device(|device| device.driver.is_stalled(endpoint, direction))
    }

    pub fn is_tx_idle(&self, endpoint: usize) -> bool {
        self.with_device(|device| device.driver.is_tx_idle(endpoint))
    }

    pub fn is_rx_idle(&self, endpoint: usize) -> bool {
        self.with_device(|device| device.driver.is_rx_idle(endpoint))
    }

    pub fn faults(&self) -> Faults {
        self.with_device(|device| device.driver.faults())
    }

    /// The configuration value selected by the host, or zero
    pub fn configuration(&self) -> u8 {
        self.with_device(|device| device.control.configuration())
    }
}
