//! Control bytes used on the wire by XMODEM.

pub const SOH: u8 = 0x01;
pub const STX: u8 = 0x02;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;
/// Sent by the receiver to request CRC-16 mode instead of the arithmetic checksum.
pub const CRC_MODE: u8 = b'C';
