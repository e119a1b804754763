//! USB interrupt handling

use crate::{
    callbacks::Callbacks,
    control::Control,
    endpoint::{RxBuffer, EPREG_MASK},
    ral::{endpoint::EPR, usb::ISTR},
    Controller, Driver,
};

bitflags::bitflags! {
    /// Interrupt status flags
    ///
    /// Except for `CTR`, these are cleared by writing zero.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Interrupts: u16 {
        /// Correct transfer; at least one endpoint completed a transaction
        const CTR = ISTR::CTR::mask;
        /// Packet memory over / underrun
        const PMAOVR = ISTR::PMAOVR::mask;
        /// Transaction error
        const ERR = ISTR::ERR::mask;
        /// Wakeup
        const WKUP = ISTR::WKUP::mask;
        /// Suspend
        const SUSP = ISTR::SUSP::mask;
        /// Bus reset
        const RESET = ISTR::RESET::mask;
        /// Start of frame
        const SOF = ISTR::SOF::mask;
        /// Expected start of frame never arrived
        const ESOF = ISTR::ESOF::mask;
    }
}

fn clear<R: Controller>(driver: &Driver<R>, flag: Interrupts) {
    driver.controller().write_istr(!flag.bits());
}

/// Clear one of the endpoint's CTR flags, leaving the other alone
fn clear_transfer_flag<R: Controller>(driver: &Driver<R>, endpoint: usize, flag: u16) {
    let epr = driver.controller().read_endpoint(endpoint);
    driver.controller().write_endpoint(
        endpoint,
        ((epr & EPREG_MASK) | EPR::CTR_RX::mask | EPR::CTR_TX::mask) & !flag,
    );
}

/// Handle every pending USB interrupt
///
/// Call this from the USB interrupt handler. Bus events are handled once per
/// call. Endpoint transfers are handled until none remain; receive before
/// transmit on each endpoint.
pub fn dispatch<R: Controller, C: Callbacks<R>>(
    driver: &mut Driver<R>,
    control: &mut Control,
    callbacks: &mut C,
) {
    let istr = Interrupts::from_bits_truncate(driver.controller().read_istr());
    trace!("ISTR {}", istr.bits());

    if istr.contains(Interrupts::RESET) {
        control.reset();
        driver.reset_with(|driver| callbacks.on_bus_reset(driver));
        clear(driver, Interrupts::RESET);
    }
    if istr.contains(Interrupts::SUSP) {
        clear(driver, Interrupts::SUSP);
    }
    if istr.contains(Interrupts::WKUP) {
        clear(driver, Interrupts::WKUP);
    }
    if istr.contains(Interrupts::ERR) {
        let faults = driver.faults_mut();
        faults.errors = faults.errors.wrapping_add(1);
        warn!("TRANSACTION ERROR");
        clear(driver, Interrupts::ERR);
    }
    if istr.contains(Interrupts::SOF) {
        callbacks.on_start_of_frame(driver);
        clear(driver, Interrupts::SOF);
    }
    if istr.contains(Interrupts::ESOF) {
        clear(driver, Interrupts::ESOF);
    }
    if istr.contains(Interrupts::PMAOVR) {
        let faults = driver.faults_mut();
        faults.packet_memory_overruns = faults.packet_memory_overruns.wrapping_add(1);
        warn!("PACKET MEMORY OVERRUN");
        clear(driver, Interrupts::PMAOVR);
    }

    loop {
        let istr = driver.controller().read_istr();
        if istr & ISTR::CTR::mask == 0 {
            break;
        }
        let endpoint = usize::from(istr & ISTR::EP_ID::mask);
        let epr = driver.controller().read_endpoint(endpoint);

        if epr & EPR::CTR_RX::mask != 0 {
            received(driver, control, callbacks, endpoint, epr);
        }
        if epr & EPR::CTR_TX::mask != 0 {
            let complete = driver.transmit_complete(endpoint);
            clear_transfer_flag(driver, endpoint, EPR::CTR_TX::mask);
            match complete {
                Some(buffer) if endpoint == 0 => control.control_in(driver, callbacks, buffer),
                Some(buffer) => callbacks.on_endpoint_sent(driver, endpoint, buffer),
                None => {}
            }
        }
    }
}

fn received<R: Controller, C: Callbacks<R>>(
    driver: &mut Driver<R>,
    control: &mut Control,
    callbacks: &mut C,
    endpoint: usize,
    epr: u16,
) {
    if endpoint == 0 && epr & EPR::SETUP::mask != 0 {
        let setup = driver.receive_setup();
        clear_transfer_flag(driver, endpoint, EPR::CTR_RX::mask);
        control.setup(driver, callbacks, &setup);
        return;
    }

    let complete = driver.receive_complete(endpoint);
    clear_transfer_flag(driver, endpoint, EPR::CTR_RX::mask);
    match complete {
        Some((RxBuffer::Data(buffer), len)) if endpoint != 0 => {
            callbacks.on_endpoint_received(driver, endpoint, buffer, len)
        }
        Some((RxBuffer::Data(buffer), len)) => {
            control.control_out(driver, callbacks, Some(buffer), len)
        }
        Some((RxBuffer::Setup, len)) => control.control_out(driver, callbacks, None, len),
        None => {}
    }
}
