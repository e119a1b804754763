//! Register access layer for the packet-memory USB peripheral
//!
//! The register blocks follow the `ral-registers` conventions, so the
//! `read_reg!`, `write_reg!`, and `modify_reg!` macros work on them. Every
//! USB register is 16 bits wide, and sits on a 32-bit boundary. The upper
//! halfword of each slot is reserved.
//!
//! It also adds some enhancements for endpoint register access.

#![allow(non_snake_case, non_upper_case_globals)]

pub use ral_registers::{modify_reg, read_reg, write_reg, RWRegister};

use crate::Controller;

/// USB full-speed device registers
pub mod usb {
    use super::RWRegister;

    #[repr(C)]
    pub struct RegisterBlock {
        pub EP0R: RWRegister<u16>,
        _reserved0: u16,
        pub EP1R: RWRegister<u16>,
        _reserved1: u16,
        pub EP2R: RWRegister<u16>,
        _reserved2: u16,
        pub EP3R: RWRegister<u16>,
        _reserved3: u16,
        pub EP4R: RWRegister<u16>,
        _reserved4: u16,
        pub EP5R: RWRegister<u16>,
        _reserved5: u16,
        pub EP6R: RWRegister<u16>,
        _reserved6: u16,
        pub EP7R: RWRegister<u16>,
        _reserved7: u16,
        _reserved8: [u32; 8],
        pub CNTR: RWRegister<u16>,
        _reserved9: u16,
        pub ISTR: RWRegister<u16>,
        _reserved10: u16,
        pub FNR: RWRegister<u16>,
        _reserved11: u16,
        pub DADDR: RWRegister<u16>,
        _reserved12: u16,
        pub BTABLE: RWRegister<u16>,
        _reserved13: u16,
        pub LPMCSR: RWRegister<u16>,
        _reserved14: u16,
        pub BCDR: RWRegister<u16>,
        _reserved15: u16,
    }

    const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x5C) as usize];

    pub mod CNTR {
        pub mod CTRM {
            pub const offset: u16 = 15;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod PMAOVRM {
            pub const offset: u16 = 14;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ERRM {
            pub const offset: u16 = 13;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod WKUPM {
            pub const offset: u16 = 12;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SUSPM {
            pub const offset: u16 = 11;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod RESETM {
            pub const offset: u16 = 10;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SOFM {
            pub const offset: u16 = 9;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ESOFM {
            pub const offset: u16 = 8;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod LPMODE {
            pub const offset: u16 = 2;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod PDWN {
            pub const offset: u16 = 1;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod FRES {
            pub const offset: u16 = 0;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod ISTR {
        pub mod CTR {
            pub const offset: u16 = 15;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod PMAOVR {
            pub const offset: u16 = 14;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ERR {
            pub const offset: u16 = 13;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod WKUP {
            pub const offset: u16 = 12;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SUSP {
            pub const offset: u16 = 11;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod RESET {
            pub const offset: u16 = 10;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SOF {
            pub const offset: u16 = 9;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ESOF {
            pub const offset: u16 = 8;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod DIR {
            pub const offset: u16 = 4;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EP_ID {
            pub const offset: u16 = 0;
            pub const mask: u16 = 0xF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod DADDR {
        pub mod EF {
            pub const offset: u16 = 7;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ADD {
            pub const offset: u16 = 0;
            pub const mask: u16 = 0x7F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod BTABLE {
        pub mod BTABLE {
            pub const offset: u16 = 3;
            pub const mask: u16 = 0x1FFF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod BCDR {
        pub mod DPPU {
            pub const offset: u16 = 15;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }
}

/// Clock recovery system registers
pub mod crs {
    use super::RWRegister;

    #[repr(C)]
    pub struct RegisterBlock {
        pub CR: RWRegister<u32>,
        pub CFGR: RWRegister<u32>,
        pub ISR: RWRegister<u32>,
        pub ICR: RWRegister<u32>,
    }

    pub mod CR {
        pub mod AUTOTRIMEN {
            pub const offset: u32 = 6;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod CEN {
            pub const offset: u32 = 5;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }
}

/// The RAL API requires us to treat all endpoint registers as unique.
/// We can make it a little easier with this function, the `EpR` type,
/// and the helper module.
pub mod endpoint {
    use super::{usb, RWRegister};

    pub struct EpR<'a> {
        pub EPR: &'a RWRegister<u16>,
    }

    pub mod EPR {
        pub mod CTR_RX {
            pub const offset: u16 = 15;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod DTOG_RX {
            pub const offset: u16 = 14;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod STAT_RX {
            pub const offset: u16 = 12;
            pub const mask: u16 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SETUP {
            pub const offset: u16 = 11;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EP_TYPE {
            pub const offset: u16 = 9;
            pub const mask: u16 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EP_KIND {
            pub const offset: u16 = 8;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod CTR_TX {
            pub const offset: u16 = 7;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod DTOG_TX {
            pub const offset: u16 = 6;
            pub const mask: u16 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod STAT_TX {
            pub const offset: u16 = 4;
            pub const mask: u16 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EA {
            pub const offset: u16 = 0;
            pub const mask: u16 = 0xF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub fn register(usb: &usb::RegisterBlock, endpoint: usize) -> EpR<'_> {
        EpR {
            EPR: match endpoint {
                0 => &usb.EP0R,
                1 => &usb.EP1R,
                2 => &usb.EP2R,
                3 => &usb.EP3R,
                4 => &usb.EP4R,
                5 => &usb.EP5R,
                6 => &usb.EP6R,
                7 => &usb.EP7R,
                _ => unreachable!("EP{}R register doesn't exist", endpoint),
            },
        }
    }
}

/// The USB register blocks and packet memory used by the driver
pub struct Instances {
    usb: &'static usb::RegisterBlock,
    crs: &'static crs::RegisterBlock,
    packet_memory: *mut u16,
}

// Safety: the register blocks are only reachable through the driver
// that owns the `Instances`.
unsafe impl Send for Instances {}

/// Cast the peripheral addresses into register blocks
pub fn instances<P: crate::Peripherals>(peripherals: P) -> Instances {
    // Safety: `Peripherals` implementers promise that these
    // addresses are valid, and owned by `peripherals`.
    unsafe {
        Instances {
            usb: &*peripherals.usb().cast::<usb::RegisterBlock>(),
            crs: &*peripherals.crs().cast::<crs::RegisterBlock>(),
            packet_memory: peripherals.packet_memory().cast_mut().cast::<u16>(),
        }
    }
}

impl Controller for Instances {
    fn read_istr(&self) -> u16 {
        read_reg!(usb, self.usb, ISTR)
    }

    fn write_istr(&self, value: u16) {
        write_reg!(usb, self.usb, ISTR, value);
    }

    fn write_cntr(&self, value: u16) {
        write_reg!(usb, self.usb, CNTR, value);
    }

    fn read_endpoint(&self, index: usize) -> u16 {
        let epr = endpoint::register(self.usb, index);
        read_reg!(endpoint, &epr, EPR)
    }

    fn write_endpoint(&self, index: usize, value: u16) {
        let epr = endpoint::register(self.usb, index);
        write_reg!(endpoint, &epr, EPR, value);
    }

    fn write_daddr(&self, value: u16) {
        write_reg!(usb, self.usb, DADDR, value);
    }

    fn write_btable(&self, offset: u16) {
        write_reg!(usb, self.usb, BTABLE, BTABLE: offset >> 3);
    }

    fn set_pullup(&self, enable: bool) {
        modify_reg!(usb, self.usb, BCDR, DPPU: enable as u16);
    }

    fn set_clock_recovery(&self, enable: bool) {
        let enable = enable as u32;
        modify_reg!(crs, self.crs, CR, AUTOTRIMEN: enable, CEN: enable);
    }

    fn read_packet_memory(&self, offset: u16) -> u16 {
        // Safety: offset is a halfword offset inside the packet memory, and
        // we only perform 16-bit accesses.
        unsafe { self.packet_memory.add(usize::from(offset) / 2).read_volatile() }
    }

    fn write_packet_memory(&self, offset: u16, value: u16) {
        // Safety: see read_packet_memory.
        unsafe {
            self.packet_memory
                .add(usize::from(offset) / 2)
                .write_volatile(value)
        }
    }
}
