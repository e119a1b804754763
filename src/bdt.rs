//! Buffer descriptor table (BDT)
//!
//! The table lives in packet memory, and the USB peripheral finds it through
//! the BTABLE register. Each endpoint has one descriptor of four halfwords:
//!
//! | Offset | Field      |
//! | ------ | ---------- |
//! | 0      | `tx_addr`  |
//! | 2      | `tx_count` |
//! | 4      | `rx_addr`  |
//! | 6      | `rx_count` |
//!
//! An address of zero means that no buffer has been allocated. That's
//! never a valid buffer address, since buffers are always allocated after
//! the table.

use crate::{Controller, ENDPOINT_COUNT};

/// Size of one buffer descriptor, in bytes
const DESCRIPTOR_SIZE: u16 = 8;

/// Size of the whole table, in bytes
pub const TABLE_SIZE: u16 = DESCRIPTOR_SIZE * ENDPOINT_COUNT as u16;

const TX_ADDR: u16 = 0;
const TX_COUNT: u16 = 2;
const RX_ADDR: u16 = 4;
const RX_COUNT: u16 = 6;

/// Received byte count, held in the low bits of `rx_count`
const COUNT_RX_MASK: u16 = 0x3FF;
/// Selects 32 byte blocks when set, 2 byte blocks when clear
const BL_SIZE: u16 = 1 << 15;
const NUM_BLOCK_OFFSET: u16 = 10;

/// The largest packet that fits the receive encoding
pub const MAX_PACKET_SIZE: u16 = 1023;

/// Encode the receive buffer size for `packet_size` bytes
///
/// Returns the `rx_count` value, and the buffer capacity that it describes.
/// The capacity is `packet_size` rounded up to the block size; allocate
/// that much so that the peripheral never writes beyond the buffer.
pub const fn rx_block_count(packet_size: u16) -> (u16, u16) {
    if packet_size > 62 {
        let blocks = (packet_size + 31) / 32;
        (BL_SIZE | ((blocks - 1) << NUM_BLOCK_OFFSET), blocks * 32)
    } else {
        let blocks = (packet_size + 1) / 2;
        (blocks << NUM_BLOCK_OFFSET, blocks * 2)
    }
}

/// A view of the buffer descriptor table in packet memory
#[derive(Clone, Copy)]
pub struct DescriptorTable {
    base: u16,
}

impl DescriptorTable {
    /// `base` must be 8-byte aligned
    pub const fn new(base: u16) -> Self {
        DescriptorTable { base }
    }

    /// The table's packet memory address, for the BTABLE register
    pub fn base(&self) -> u16 {
        self.base
    }

    fn field(&self, endpoint: usize, field: u16) -> u16 {
        self.base + endpoint as u16 * DESCRIPTOR_SIZE + field
    }

    pub fn tx_addr<R: Controller>(&self, controller: &R, endpoint: usize) -> u16 {
        controller.read_packet_memory(self.field(endpoint, TX_ADDR))
    }

    pub fn set_tx_addr<R: Controller>(&self, controller: &R, endpoint: usize, addr: u16) {
        controller.write_packet_memory(self.field(endpoint, TX_ADDR), addr);
    }

    pub fn set_tx_count<R: Controller>(&self, controller: &R, endpoint: usize, count: u16) {
        controller.write_packet_memory(self.field(endpoint, TX_COUNT), count);
    }

    pub fn rx_addr<R: Controller>(&self, controller: &R, endpoint: usize) -> u16 {
        controller.read_packet_memory(self.field(endpoint, RX_ADDR))
    }

    pub fn set_rx_addr<R: Controller>(&self, controller: &R, endpoint: usize, addr: u16) {
        controller.write_packet_memory(self.field(endpoint, RX_ADDR), addr);
    }

    /// Describe the receive buffer capacity with an [`rx_block_count`] encoding
    pub fn set_rx_blocks<R: Controller>(&self, controller: &R, endpoint: usize, blocks: u16) {
        controller.write_packet_memory(self.field(endpoint, RX_COUNT), blocks);
    }

    /// The number of bytes received by the last OUT or SETUP transaction
    pub fn rx_count<R: Controller>(&self, controller: &R, endpoint: usize) -> u16 {
        controller.read_packet_memory(self.field(endpoint, RX_COUNT)) & COUNT_RX_MASK
    }

    /// Zero every descriptor
    pub fn clear<R: Controller>(&self, controller: &R) {
        (self.base..self.base + TABLE_SIZE)
            .step_by(2)
            .for_each(|offset| controller.write_packet_memory(offset, 0));
    }
}

#[cfg(test)]
mod test {
    use super::{rx_block_count, DescriptorTable, TABLE_SIZE};
    use crate::sim::Sim;
    use crate::Controller;

    #[test]
    fn small_blocks() {
        assert_eq!(rx_block_count(2), (1 << 10, 2));
        assert_eq!(rx_block_count(8), (4 << 10, 8));
        assert_eq!(rx_block_count(9), (5 << 10, 10));
        assert_eq!(rx_block_count(62), (31 << 10, 62));
    }

    #[test]
    fn large_blocks() {
        assert_eq!(rx_block_count(63), (0x8000 | (1 << 10), 64));
        assert_eq!(rx_block_count(64), (0x8000 | (1 << 10), 64));
        assert_eq!(rx_block_count(65), (0x8000 | (2 << 10), 96));
        assert_eq!(rx_block_count(1023), (0x8000 | (31 << 10), 1024));
    }

    #[test]
    fn descriptor_layout() {
        let sim = Sim::new();
        let bdt = DescriptorTable::new(0);
        bdt.set_tx_addr(&sim, 3, 0x100);
        bdt.set_tx_count(&sim, 3, 7);
        bdt.set_rx_addr(&sim, 3, 0x140);
        bdt.set_rx_blocks(&sim, 3, 0x8400);

        assert_eq!(sim.read_packet_memory(24), 0x100);
        assert_eq!(sim.read_packet_memory(26), 7);
        assert_eq!(sim.read_packet_memory(28), 0x140);
        assert_eq!(sim.read_packet_memory(30), 0x8400);
        assert_eq!(bdt.tx_addr(&sim, 3), 0x100);
        assert_eq!(bdt.rx_addr(&sim, 3), 0x140);
    }

    #[test]
    fn received_count_ignores_block_encoding() {
        let sim = Sim::new();
        let bdt = DescriptorTable::new(0);
        bdt.set_rx_blocks(&sim, 1, 0x8400 | 64);
        assert_eq!(bdt.rx_count(&sim, 1), 64);
    }

    #[test]
    fn clear_table() {
        let sim = Sim::new();
        let bdt = DescriptorTable::new(0);
        for offset in (0..TABLE_SIZE + 4).step_by(2) {
            sim.write_packet_memory(offset, 0xFFFF);
        }
        bdt.clear(&sim);
        assert!((0..TABLE_SIZE).step_by(2).all(|o| sim.read_packet_memory(o) == 0));
        assert_eq!(sim.read_packet_memory(TABLE_SIZE), 0xFFFF);
    }
}
