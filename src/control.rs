//! Endpoint 0 control transfers
//!
//! Tracks the stage of the control transfer in progress. Interpreting
//! requests is left to [`Callbacks`], with two exceptions: standard
//! SET_CONFIGURATION and SET_INTERFACE requests are also reported through
//! their own callbacks, and a standard SET_ADDRESS takes effect once its
//! status stage completes.

use crate::{callbacks::Callbacks, driver::SETUP_PACKET_SIZE, Controller, Driver};

const SET_ADDRESS: u8 = 5;
const SET_CONFIGURATION: u8 = 9;
const SET_INTERFACE: u8 = 11;

/// bmRequestType for standard, host-to-device requests
const STANDARD_TO_DEVICE: u8 = 0x00;
const STANDARD_TO_INTERFACE: u8 = 0x01;

/// A control request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Decode a SETUP packet, as it appears on the wire
    pub const fn parse(raw: &[u8; SETUP_PACKET_SIZE]) -> Self {
        SetupPacket {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    /// `true` if the data stage, if any, is device to host
    pub const fn is_device_to_host(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// A completed endpoint 0 transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    Setup,
    In,
    Out,
}

/// Control transfer stage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for a SETUP packet
    #[default]
    Idle,
    /// Sending data to the host
    DataIn,
    /// Receiving data from the host
    DataOut,
    /// Waiting for the status stage to complete
    Status,
}

/// Endpoint 0 state machine
#[derive(Default)]
pub struct Control {
    stage: Stage,
    setup: SetupPacket,
    configuration: u8,
    pending_address: Option<u8>,
}

impl Control {
    pub const fn new() -> Self {
        Control {
            stage: Stage::Idle,
            setup: SetupPacket {
                request_type: 0,
                request: 0,
                value: 0,
                index: 0,
                length: 0,
            },
            configuration: 0,
            pending_address: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The most recent SETUP packet
    pub fn last_setup(&self) -> &SetupPacket {
        &self.setup
    }

    /// The configuration value from the last SET_CONFIGURATION
    ///
    /// Zero when unconfigured.
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Forget everything; the bus was reset
    pub fn reset(&mut self) {
        *self = Control::new();
    }

    fn advance(&mut self, token: Token) {
        self.stage = match (token, self.stage) {
            (Token::Setup, _) if self.setup.length == 0 => Stage::Status,
            (Token::Setup, _) if self.setup.is_device_to_host() => Stage::DataIn,
            (Token::Setup, _) => Stage::DataOut,
            (Token::In, Stage::DataIn) | (Token::Out, Stage::DataOut) => Stage::Status,
            (Token::In, Stage::Status) | (Token::Out, Stage::Status) => Stage::Idle,
            (_, stage) => stage,
        };
    }

    /// Handle a SETUP packet
    pub(crate) fn setup<R: Controller, C: Callbacks<R>>(
        &mut self,
        driver: &mut Driver<R>,
        callbacks: &mut C,
        raw: &[u8; SETUP_PACKET_SIZE],
    ) {
        self.setup = SetupPacket::parse(raw);
        self.pending_address = None;
        self.advance(Token::Setup);
        let setup = self.setup;
        debug!(
            "SETUP {} {} {} {} {}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            setup.length
        );

        callbacks.on_setup(driver, &setup);
        match (setup.request_type, setup.request) {
            (STANDARD_TO_DEVICE, SET_ADDRESS) => {
                self.pending_address = Some(setup.value as u8 & 0x7F);
            }
            (STANDARD_TO_DEVICE, SET_CONFIGURATION) => {
                self.configuration = setup.value as u8;
                callbacks.on_set_configuration(driver, self.configuration);
            }
            (STANDARD_TO_INTERFACE, SET_INTERFACE) => {
                callbacks.on_set_interface(driver, self.configuration, setup.index as u8);
            }
            _ => {}
        }
        self.rearm(driver);
    }

    /// Handle a completed IN transfer
    pub(crate) fn control_in<R: Controller, C: Callbacks<R>>(
        &mut self,
        driver: &mut Driver<R>,
        callbacks: &mut C,
        buffer: &'static [u8],
    ) {
        let finished = self.stage == Stage::Status;
        self.advance(Token::In);
        if finished {
            // The address only changes after the host acknowledges the request.
            if let Some(address) = self.pending_address.take() {
                driver.set_address(address);
            }
        }
        callbacks.on_control_in(driver, buffer);
        self.rearm(driver);
    }

    /// Handle a completed OUT transfer
    pub(crate) fn control_out<R: Controller, C: Callbacks<R>>(
        &mut self,
        driver: &mut Driver<R>,
        callbacks: &mut C,
        buffer: Option<&'static mut [u8]>,
        len: usize,
    ) {
        self.advance(Token::Out);
        callbacks.on_control_out(driver, buffer, len);
        self.rearm(driver);
    }

    fn rearm<R: Controller>(&self, driver: &mut Driver<R>) {
        if driver.is_rx_idle(0) {
            if let Err(err) = driver.arm_setup() {
                warn!("EP0 ARM FAILED {:?}", err);
            }
        }
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::{Control, SetupPacket, Stage};
    use crate::{callbacks::Callbacks, driver::Config, sim::Sim, Driver};
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        setups: Vec<SetupPacket>,
        configurations: Vec<u8>,
        interfaces: Vec<(u8, u8)>,
        control_in: usize,
        control_out: Vec<(bool, usize)>,
        reply: Option<&'static [u8]>,
    }

    impl Callbacks<Sim> for Recorder {
        fn on_setup(&mut self, driver: &mut Driver<Sim>, setup: &SetupPacket) {
            self.setups.push(*setup);
            if let Some(reply) = self.reply.take() {
                driver.send(0, Some(reply)).unwrap();
            }
        }
        fn on_set_configuration(&mut self, _: &mut Driver<Sim>, configuration: u8) {
            self.configurations.push(configuration);
        }
        fn on_set_interface(&mut self, _: &mut Driver<Sim>, configuration: u8, interface: u8) {
            self.interfaces.push((configuration, interface));
        }
        fn on_control_in(&mut self, _: &mut Driver<Sim>, _: &'static [u8]) {
            self.control_in += 1;
        }
        fn on_control_out(
            &mut self,
            _: &mut Driver<Sim>,
            buffer: Option<&'static mut [u8]>,
            len: usize,
        ) {
            self.control_out.push((buffer.is_some(), len));
        }
    }

    fn driver() -> Driver<Sim> {
        let mut driver = Driver::new(Sim::new(), Config::default());
        driver.bus_reset();
        driver
    }

    #[test]
    fn parse_setup_packet() {
        let setup = SetupPacket::parse(&[0x80, 0x06, 0x00, 0x01, 0x09, 0x04, 0x12, 0x00]);
        assert_eq!(
            setup,
            SetupPacket {
                request_type: 0x80,
                request: 6,
                value: 0x0100,
                index: 0x0409,
                length: 18,
            }
        );
        assert!(setup.is_device_to_host());
    }

    #[test]
    fn setup_without_data() {
        let mut driver = driver();
        let mut control = Control::new();
        let mut recorder = Recorder::default();
        control.setup(&mut driver, &mut recorder, &[0x00, 9, 2, 0, 0, 0, 0, 0]);

        assert_eq!(control.stage(), Stage::Status);
        assert_eq!(control.configuration(), 2);
        assert_eq!(recorder.configurations, [2]);
        assert_eq!(recorder.setups.len(), 1);
        // Nobody took endpoint 0, so it waits for the next SETUP.
        assert!(!driver.is_rx_idle(0));

        control.setup(&mut driver, &mut recorder, &[0x01, 11, 1, 0, 3, 0, 0, 0]);
        assert_eq!(recorder.interfaces, [(2, 3)]);
    }

    #[test]
    fn stages_of_a_read() {
        let mut driver = driver();
        let mut control = Control::new();
        let mut recorder = Recorder {
            reply: Some(&[1, 2, 3]),
            ..Default::default()
        };
        control.setup(&mut driver, &mut recorder, &[0x80, 6, 0, 1, 0, 0, 18, 0]);
        assert_eq!(control.stage(), Stage::DataIn);
        assert!(!driver.is_tx_idle(0));

        control.control_in(&mut driver, &mut recorder, &[1, 2, 3]);
        assert_eq!(control.stage(), Stage::Status);
        control.control_out(&mut driver, &mut recorder, None, 0);
        assert_eq!(control.stage(), Stage::Idle);
        assert_eq!(recorder.control_in, 1);
        assert_eq!(recorder.control_out, [(false, 0)]);
    }

    #[test]
    fn address_changes_after_status() {
        let mut driver = driver();
        let mut control = Control::new();
        let mut recorder = Recorder::default();
        control.setup(&mut driver, &mut recorder, &[0x00, 5, 0x2A, 0, 0, 0, 0, 0]);
        assert_eq!(driver.controller().daddr(), 0x80);

        driver.send(0, Some(&[])).unwrap();
        control.control_in(&mut driver, &mut recorder, &[]);
        assert_eq!(driver.controller().daddr(), 0x80 | 0x2A);
        assert_eq!(control.stage(), Stage::Idle);
    }

    #[test]
    fn reset_forgets_configuration() {
        let mut driver = driver();
        let mut control = Control::new();
        control.setup(&mut driver, &mut (), &[0x00, 9, 1, 0, 0, 0, 0, 0]);
        assert_eq!(control.configuration(), 1);
        control.reset();
        assert_eq!(control.configuration(), 0);
        assert_eq!(control.stage(), Stage::Idle);
    }
}
