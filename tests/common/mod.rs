#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use xmodem_proto::{crc16, Transmit, XmodemServer, BLOCK_SIZE_1K};

pub const SOH: u8 = 0x01;
pub const STX: u8 = 0x02;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;
pub const PAD: u8 = 0x1a;

/// Simulation step of the polling loop.
pub const TICK_MS: u32 = 10;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn frame(number: u8, data: &[u8]) -> Vec<u8> {
    let header = if data.len() == BLOCK_SIZE_1K { STX } else { SOH };
    let crc = crc16(data);
    let mut frame = vec![header, number, !number];
    frame.extend_from_slice(data);
    frame.push((crc >> 8) as u8);
    frame.push(crc as u8);
    frame
}

/// Receiver-to-sender half of a simulated serial line.
#[derive(Default, Clone)]
pub struct Link(Rc<RefCell<VecDeque<u8>>>);

impl Link {
    pub fn new() -> Link {
        Default::default()
    }

    pub fn transmitter(&self) -> impl FnMut(u8) {
        let line = Rc::clone(&self.0);
        move |byte: u8| line.borrow_mut().push_back(byte)
    }

    pub fn take(&self) -> Vec<u8> {
        self.0.borrow_mut().drain(..).collect()
    }
}

/// Scripted XMODEM-CRC sender with fault injection.
///
/// Faults are given as block indices and fire once each.
#[derive(Default)]
pub struct Sender {
    blocks: Vec<Vec<u8>>,
    current: usize,
    started: bool,
    sent_eot: bool,
    pub finished: bool,
    pub cancelled: bool,
    pub corrupt: Vec<usize>,
    pub lose_ack: Vec<usize>,
    pub stall: Vec<usize>,
    pub retries: usize,
}

impl Sender {
    pub fn new(data: &[u8], block_size: usize) -> Sender {
        let blocks = data
            .chunks(block_size)
            .map(|chunk| {
                let mut block = chunk.to_vec();
                block.resize(block_size, PAD);
                block
            })
            .collect();
        Sender {
            blocks,
            ..Default::default()
        }
    }

    /// React to one control byte from the receiver, returning what goes on the wire.
    pub fn on_control(&mut self, byte: u8) -> Vec<u8> {
        if self.finished || self.cancelled {
            return Vec::new();
        }
        match byte {
            b'C' if !self.started => {
                self.started = true;
                self.send_current()
            }
            ACK if self.sent_eot => {
                self.finished = true;
                Vec::new()
            }
            ACK if take_fault(&mut self.lose_ack, self.current) => self.send_current(),
            ACK => {
                self.current += 1;
                self.send_current()
            }
            NAK if self.started => {
                self.retries += 1;
                self.send_current()
            }
            CAN => {
                self.cancelled = true;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn send_current(&mut self) -> Vec<u8> {
        if self.current >= self.blocks.len() {
            self.sent_eot = true;
            return vec![EOT];
        }
        let mut bytes = frame((self.current + 1) as u8, &self.blocks[self.current]);
        if take_fault(&mut self.corrupt, self.current) {
            bytes[3] ^= 0x80;
        } else if take_fault(&mut self.stall, self.current) {
            bytes.truncate(bytes.len() / 2);
        }
        bytes
    }
}

fn take_fault(faults: &mut Vec<usize>, block: usize) -> bool {
    if let Some(pos) = faults.iter().position(|b| *b == block) {
        faults.remove(pos);
        true
    } else {
        false
    }
}

/// What came out of a simulated transfer.
#[derive(Debug, Default)]
pub struct Received {
    pub data: Vec<u8>,
    pub numbers: Vec<u32>,
    pub elapsed_ms: u32,
}

/// Poll `server` every tick, shuttling bytes between it and `sender`, until
/// the session ends or `limit_ms` passes.
pub fn run_transfer<T: Transmit, const N: usize>(
    server: &mut XmodemServer<T, N>,
    link: &Link,
    sender: &mut Sender,
    limit_ms: u32,
) -> anyhow::Result<Received> {
    let mut received = Received::default();
    let mut out = [0u8; BLOCK_SIZE_1K];
    let mut now = 0;

    while !server.is_done() && now < limit_ms {
        now += TICK_MS;
        if let Some(block) = server.process(&mut out, now)? {
            received.data.extend_from_slice(&out[..block.len]);
            received.numbers.push(block.number);
        }
        for control in link.take() {
            for byte in sender.on_control(control) {
                server.receive_byte(byte);
            }
        }
    }
    // Let the sender see the final ACK or CAN.
    for control in link.take() {
        sender.on_control(control);
    }
    received.elapsed_ms = now;
    Ok(received)
}

pub fn test_file(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 7) as u8).collect()
}
