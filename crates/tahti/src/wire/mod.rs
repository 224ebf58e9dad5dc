//! Control-protocol packets and bytecode framing
//!
//! Everything on the wire is big-endian. The handshake packets are fixed
//! size; the bytecode stream is tag-prefixed with 4-byte command words and
//! 2-byte handler-action words.

pub mod parse;

pub mod encode;

/// Supported protocol dialect.
pub const DIALECT: u16 = 0x0000;

// handshake magic
pub(crate) const HEI: &[u8; 3] = b"hei";
pub(crate) const JOO: &[u8; 3] = b"joo";
pub(crate) const EI: &[u8; 2] = b"ei";
pub(crate) const OTA_SE: &[u8; 6] = b"ota se";
pub(crate) const LOPPU: &[u8; 5] = b"loppu";

/// `hei` packet: magic plus dialect.
pub(crate) const HEI_LEN: usize = HEI.len() + 2;
/// `ota se` packet: magic plus payload length plus crc32.
pub(crate) const OTA_SE_LEN: usize = OTA_SE.len() + 4 + 4;

// 4-byte command words, compared as big-endian u32
pub(crate) const TIMESLICE: u32 = u32::from_be_bytes([0x76, 0x04, 0x6c, 0x00]);
pub(crate) const TIMESLICE_END: u32 = u32::from_be_bytes([0xde, 0xad, 0x76, 0x00]);
pub(crate) const WHEN: u32 = u32::from_be_bytes([0x6a, 0x6f, 0x73, 0x00]);
pub(crate) const WHEN_END: u32 = u32::from_be_bytes([0xde, 0xad, 0x6a, 0x00]);
pub(crate) const RESUME: u32 = u32::from_be_bytes([0x6a, 0x04, 0x61, 0x00]);
pub(crate) const TIMEOUT: u32 = u32::from_be_bytes([0x75, 0x6e, 0x69, 0x00]);
pub(crate) const WAITSTATE: u32 = u32::from_be_bytes([0x6f, 0x05, 0x61, 0x00]);

// 2-byte handler-action words
pub(crate) const ACT_CALLBACK: u16 = 0x0000;
pub(crate) const ACT_CONTINUE: u16 = 0x0001;
pub(crate) const ACT_PANIC: u16 = 0x0002;
pub(crate) const ACT_SLEEP: u16 = 0x0004;
pub(crate) const ACT_WAIT: u16 = 0x0008;
