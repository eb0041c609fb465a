//! This crate implements the receiving side of the XMODEM-CRC file transfer
//! protocol as a sans-io state machine, meant to sit behind an embedded
//! serial shell.
//!
//! The receiver never touches a serial port itself. Received bytes are fed
//! to [`XmodemServer::receive_byte`], and [`XmodemServer::process`] is polled
//! with a millisecond timestamp to run the timeouts and hand out completed
//! blocks. Control bytes going back to the sender are passed to a
//! caller-supplied [`Transmit`] implementation.
//!
//! No heap allocation is performed; the packet buffer lives inside the
//! server struct.
//!
//! ## Example
//! ```
//! use xmodem_proto::{State, XmodemServer};
//!
//! let mut wire: Vec<u8> = Vec::new();
//! let mut server = XmodemServer::new(|byte: u8| wire.push(byte));
//! let mut block = [0; 128];
//!
//! // An empty transfer: the sender answers the 'C' with EOT straight away.
//! server.receive_byte(0x04);
//! assert_eq!(server.process(&mut block, 10), Ok(None));
//! assert_eq!(server.state(), State::Successful);
//! drop(server);
//! assert_eq!(wire, [b'C', 0x06]);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

pub mod ascii;
mod server;
mod transmit;
mod types;

pub use server::{State, XmodemServer};
pub use transmit::Transmit;
pub use types::{Block, Config, Error, BLOCK_SIZE, BLOCK_SIZE_1K};

const CRC16_POLY: u16 = 0x1021;

/// CRC-16/XMODEM (poly 0x1021, init 0, MSB first) of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
