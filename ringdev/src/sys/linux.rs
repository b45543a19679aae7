//! Definitions of `<linux/if_packet.h>` used by the packet rings.
#![allow(non_camel_case_types)]

pub(crate) const ETH_P_ALL: libc::c_ushort = 0x0003;

pub(crate) const SOL_PACKET: libc::c_int = 263;
pub(crate) const PACKET_RX_RING: libc::c_int = 5;
pub(crate) const PACKET_VERSION: libc::c_int = 10;
pub(crate) const PACKET_TX_RING: libc::c_int = 13;

pub(crate) const TPACKET_V2: libc::c_int = 1;

/// Receive slot owned by the kernel.
pub(crate) const TP_STATUS_KERNEL: u32 = 0;
/// Receive slot holding a frame for user space.
pub(crate) const TP_STATUS_USER: u32 = 1 << 0;

/// Transmit slot free for user space.
pub(crate) const TP_STATUS_AVAILABLE: u32 = 0;
/// Transmit slot queued by user space.
pub(crate) const TP_STATUS_SEND_REQUEST: u32 = 1 << 0;
/// Transmit slot being sent by the kernel.
pub(crate) const TP_STATUS_SENDING: u32 = 1 << 1;

/// A frame looped back from another local sender.
pub(crate) const PACKET_OUTGOING: u8 = 4;
/// Offset of `sll_pkttype` within `sockaddr_ll`.
pub(crate) const SLL_PKTTYPE_OFFSET: usize = 10;

/// Alignment of headers and data within a frame slot.
pub(crate) const TPACKET_ALIGNMENT: usize = 16;

pub(crate) const fn tpacket_align(x: usize) -> usize {
    (x + TPACKET_ALIGNMENT - 1) & !(TPACKET_ALIGNMENT - 1)
}

/// Where the link layer address follows the frame header on receive.
pub(crate) const SOCKADDR_OFFSET: usize = tpacket_align(core::mem::size_of::<tpacket2_hdr>());
/// Where frame data starts in a transmit slot.
pub(crate) const TX_DATA_OFFSET: usize = SOCKADDR_OFFSET;

/// Ring geometry, see `PACKET_MMAP` in the kernel documentation.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct tpacket_req {
    pub(crate) tp_block_size: libc::c_uint,
    pub(crate) tp_block_nr: libc::c_uint,
    pub(crate) tp_frame_size: libc::c_uint,
    pub(crate) tp_frame_nr: libc::c_uint,
}

/// The header at the start of each frame slot.
#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct tpacket2_hdr {
    pub(crate) tp_status: u32,
    pub(crate) tp_len: u32,
    pub(crate) tp_snaplen: u32,
    pub(crate) tp_mac: u16,
    pub(crate) tp_net: u16,
    pub(crate) tp_sec: u32,
    pub(crate) tp_nsec: u32,
    pub(crate) tp_vlan_tci: u16,
    pub(crate) tp_vlan_tpid: u16,
    pub(crate) tp_padding: [u8; 4],
}

impl tpacket_req {
    /// A ring of `frame_nr` frames of `frame_size` bytes in blocks of `block_size` bytes.
    pub(crate) fn new(block_size: usize, frame_size: usize, frame_nr: usize) -> Self {
        let frames_per_block = block_size / frame_size;
        tpacket_req {
            tp_block_size: block_size as libc::c_uint,
            tp_block_nr: (frame_nr / frames_per_block) as libc::c_uint,
            tp_frame_size: frame_size as libc::c_uint,
            tp_frame_nr: frame_nr as libc::c_uint,
        }
    }

    /// Bytes of one mapped ring.
    pub(crate) fn ring_len(&self) -> usize {
        self.tp_block_size as usize * self.tp_block_nr as usize
    }
}
