//! Packet memory buffers
//!
//! Packet memory is only addressable by halfwords. Addresses are offsets
//! from the start of packet memory, as the USB peripheral sees them.

use crate::Controller;
use usb_device::UsbError;

/// Packet memory buffer allocator
///
/// A bump allocator. There's no way to free a single buffer; a bus reset
/// discards every allocation at once.
pub struct Allocator {
    base: u16,
    cursor: u16,
    end: u16,
    reserved: u16,
}

/// Round a byte length up to the next halfword
const fn halfwords(len: u16) -> u32 {
    (len as u32 + 1) & !1
}

impl Allocator {
    /// Manage the packet memory between `base` and `end`
    ///
    /// `base` is rounded up to a halfword boundary.
    pub const fn new(base: u16, end: u16) -> Self {
        let base = halfwords(base) as u16;
        Allocator {
            base,
            cursor: base,
            end,
            reserved: 0,
        }
    }

    /// Allocates a buffer of at least `len` bytes
    ///
    /// Returns the packet memory address of the buffer. The cursor doesn't
    /// move if the buffer doesn't fit.
    pub fn allocate(&mut self, len: u16) -> Result<u16, UsbError> {
        let address = self.cursor;
        let cursor = u32::from(address) + halfwords(len);
        if cursor > u32::from(self.end) {
            return Err(UsbError::EndpointMemoryOverflow);
        }
        self.cursor = cursor as u16;
        Ok(address)
    }

    /// Promise `len` bytes of packet memory to a future allocation
    ///
    /// This doesn't move the cursor. It lets endpoint configuration fail
    /// early, even though buffers are allocated on first use.
    pub fn reserve(&mut self, len: u16) -> Result<(), UsbError> {
        let reserved = u32::from(self.reserved) + halfwords(len);
        if reserved > u32::from(self.capacity()) {
            return Err(UsbError::EndpointMemoryOverflow);
        }
        self.reserved = reserved as u16;
        Ok(())
    }

    /// Discard every allocation and reservation
    pub fn reset(&mut self) {
        self.cursor = self.base;
        self.reserved = 0;
    }

    /// The next address that will be allocated
    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Total number of bytes that this allocator manages
    pub fn capacity(&self) -> u16 {
        self.end - self.base
    }
}

/// Copy `src` into packet memory, starting at `address`
pub fn copy_in<R: Controller>(controller: &R, src: &[u8], address: u16) {
    let mut chunks = src.chunks_exact(2);
    let mut address = address;
    for chunk in &mut chunks {
        controller.write_packet_memory(address, u16::from_le_bytes([chunk[0], chunk[1]]));
        address += 2;
    }
    if let [last] = chunks.remainder() {
        controller.write_packet_memory(address, u16::from(*last));
    }
}

/// Copy packet memory, starting at `address`, into `dst`
pub fn copy_out<R: Controller>(controller: &R, address: u16, dst: &mut [u8]) {
    let mut chunks = dst.chunks_exact_mut(2);
    let mut address = address;
    for chunk in &mut chunks {
        chunk.copy_from_slice(&controller.read_packet_memory(address).to_le_bytes());
        address += 2;
    }
    if let [last] = chunks.into_remainder() {
        *last = controller.read_packet_memory(address).to_le_bytes()[0];
    }
}
