//! A simulated USB peripheral for host-side tests
//!
//! Models the register semantics that the driver depends on: toggle bits,
//! read / clear-by-writing-zero bits, read-only bits, and an ISTR that
//! reports the lowest endpoint with a pending correct transfer. The "host"
//! methods act like the other end of the cable.

extern crate std;

use core::cell::{Cell, RefCell};
use std::vec::Vec;

use crate::ral::{endpoint::EPR, usb::ISTR};
use crate::{Controller, ENDPOINT_COUNT};

const PACKET_MEMORY_SIZE: usize = 1024;

const TOGGLE_BITS: u16 =
    EPR::DTOG_RX::mask | EPR::STAT_RX::mask | EPR::DTOG_TX::mask | EPR::STAT_TX::mask;
const CTR_BITS: u16 = EPR::CTR_RX::mask | EPR::CTR_TX::mask;
const RW_BITS: u16 = EPR::EP_TYPE::mask | EPR::EP_KIND::mask | EPR::EA::mask;
/// ISTR flags that software clears by writing zero
const ISTR_FLAGS: u16 = 0x7F00;

/// What an endpoint register reads back as after `written` is written
pub fn apply_endpoint_write(current: u16, written: u16) -> u16 {
    let toggled = (current ^ written) & TOGGLE_BITS;
    let cleared = current & written & CTR_BITS;
    let read_only = current & EPR::SETUP::mask;
    toggled | cleared | read_only | (written & RW_BITS)
}

/// Register and packet memory state, for comparisons
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Snapshot {
    pub endpoints: [u16; ENDPOINT_COUNT],
    pub istr: u16,
    pub cntr: u16,
    pub daddr: u16,
    pub btable: u16,
    pub clock_recovery: bool,
    pub packet_memory: Vec<u16>,
}

pub struct Sim {
    endpoints: [Cell<u16>; ENDPOINT_COUNT],
    istr: Cell<u16>,
    cntr: Cell<u16>,
    daddr: Cell<u16>,
    btable: Cell<u16>,
    pullup: Cell<bool>,
    clock_recovery: Cell<bool>,
    packet_memory: RefCell<[u16; PACKET_MEMORY_SIZE / 2]>,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            endpoints: Default::default(),
            istr: Cell::new(0),
            cntr: Cell::new(0),
            daddr: Cell::new(0),
            btable: Cell::new(0),
            pullup: Cell::new(false),
            clock_recovery: Cell::new(false),
            packet_memory: RefCell::new([0; PACKET_MEMORY_SIZE / 2]),
        }
    }

    /// Bytes of packet memory, starting at `offset`
    pub fn packet_memory<const N: usize>(&self, offset: u16) -> [u8; N] {
        let mut bytes = [0; N];
        crate::buffer::copy_out(self, offset, &mut bytes);
        bytes
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            endpoints: core::array::from_fn(|ep| self.endpoints[ep].get()),
            istr: self.istr.get(),
            cntr: self.cntr.get(),
            daddr: self.daddr.get(),
            btable: self.btable.get(),
            clock_recovery: self.clock_recovery.get(),
            packet_memory: self.packet_memory.borrow().to_vec(),
        }
    }

    /// Raise ISTR flags, like a bus event would
    pub fn raise(&self, flags: u16) {
        self.istr.set(self.istr.get() | (flags & ISTR_FLAGS));
    }

    pub fn cntr(&self) -> u16 {
        self.cntr.get()
    }

    pub fn daddr(&self) -> u16 {
        self.daddr.get()
    }

    pub fn pullup(&self) -> bool {
        self.pullup.get()
    }

    pub fn clock_recovery(&self) -> bool {
        self.clock_recovery.get()
    }

    /// Scribble over registers and packet memory
    pub fn scramble(&self) {
        for (ep, register) in self.endpoints.iter().enumerate() {
            register.set(0x3131 ^ ep as u16);
        }
        self.cntr.set(0xFFFF);
        self.daddr.set(0x55);
        for (idx, word) in self.packet_memory.borrow_mut().iter_mut().enumerate() {
            *word = idx as u16 ^ 0xA5A5;
        }
    }

    fn endpoint_status(&self, endpoint: usize, mask: u16) -> u16 {
        self.endpoints[endpoint].get() & mask
    }

    fn set_endpoint_bits(&self, endpoint: usize, clear: u16, set: u16) {
        let register = &self.endpoints[endpoint];
        register.set((register.get() & !clear) | set);
    }

    fn bdt(&self, endpoint: usize, field: u16) -> u16 {
        self.read_packet_memory(self.btable.get() + endpoint as u16 * 8 + field)
    }

    /// The host issues an IN token
    ///
    /// Returns the packet if the endpoint had one ready, or `None` for a NAK.
    pub fn host_in(&self, endpoint: usize) -> Option<Vec<u8>> {
        if self.endpoint_status(endpoint, EPR::STAT_TX::mask) != EPR::STAT_TX::mask {
            return None;
        }
        let address = self.bdt(endpoint, 0);
        let count = self.bdt(endpoint, 2) & 0x3FF;
        let mut packet = std::vec![0; count as usize];
        crate::buffer::copy_out(self, address, &mut packet);

        // Hardware NAKs until software re-arms, and flags the transfer.
        self.set_endpoint_bits(
            endpoint,
            EPR::STAT_TX::mask,
            (0b10 << EPR::STAT_TX::offset) | EPR::CTR_TX::mask,
        );
        Some(packet)
    }

    /// The host sends an OUT, or a SETUP, packet
    ///
    /// Returns `false` if the endpoint NAKed an OUT.
    pub fn host_out(&self, endpoint: usize, data: &[u8], setup: bool) -> bool {
        if !setup && self.endpoint_status(endpoint, EPR::STAT_RX::mask) != EPR::STAT_RX::mask {
            return false;
        }
        let address = self.bdt(endpoint, 4);
        crate::buffer::copy_in(self, data, address);
        let blocks = self.bdt(endpoint, 6) & !0x3FF;
        self.write_packet_memory(
            self.btable.get() + endpoint as u16 * 8 + 6,
            blocks | data.len() as u16,
        );

        let mut clear = EPR::STAT_RX::mask | EPR::SETUP::mask;
        let mut set = (0b10 << EPR::STAT_RX::offset) | EPR::CTR_RX::mask;
        if setup {
            clear |= EPR::STAT_TX::mask;
            set |= EPR::SETUP::mask | (0b10 << EPR::STAT_TX::offset);
        }
        self.set_endpoint_bits(endpoint, clear, set);
        true
    }
}

impl Controller for Sim {
    fn read_istr(&self) -> u16 {
        let pending = (0..ENDPOINT_COUNT)
            .find(|&ep| self.endpoints[ep].get() & CTR_BITS != 0)
            .map(|ep| {
                let dir = self.endpoints[ep].get() & EPR::CTR_RX::mask != 0;
                ISTR::CTR::mask | ((dir as u16) << ISTR::DIR::offset) | ep as u16
            });
        self.istr.get() | pending.unwrap_or(0)
    }

    fn write_istr(&self, value: u16) {
        self.istr.set(self.istr.get() & value & ISTR_FLAGS);
    }

    fn write_cntr(&self, value: u16) {
        self.cntr.set(value);
    }

    fn read_endpoint(&self, index: usize) -> u16 {
        self.endpoints[index].get()
    }

    fn write_endpoint(&self, index: usize, value: u16) {
        let register = &self.endpoints[index];
        register.set(apply_endpoint_write(register.get(), value));
    }

    fn write_daddr(&self, value: u16) {
        self.daddr.set(value);
    }

    fn write_btable(&self, offset: u16) {
        self.btable.set(offset & !0b111);
    }

    fn set_pullup(&self, enable: bool) {
        self.pullup.set(enable);
    }

    fn set_clock_recovery(&self, enable: bool) {
        self.clock_recovery.set(enable);
    }

    fn read_packet_memory(&self, offset: u16) -> u16 {
        assert!(offset % 2 == 0, "unaligned packet memory access");
        self.packet_memory.borrow()[usize::from(offset) / 2]
    }

    fn write_packet_memory(&self, offset: u16, value: u16) {
        assert!(offset % 2 == 0, "unaligned packet memory access");
        self.packet_memory.borrow_mut()[usize::from(offset) / 2] = value;
    }
}
