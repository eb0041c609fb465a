//! See [`XmodemServer`] for more details.

use core::fmt;

use arrayvec::ArrayVec;
use log::{debug, trace, warn};

use crate::ascii::*;
use crate::crc16;
use crate::transmit::Transmit;
use crate::types::{Block, BufferTooSmallSnafu, Config, Error, BLOCK_SIZE, BLOCK_SIZE_1K};

/// The states of the receiver.
///
/// Exactly one state is active at any time. [`Successful`](State::Successful)
/// and [`Failure`](State::Failure) are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// `'C'` has been sent, no byte has arrived from the sender yet.
    Start,
    /// Waiting for the SOH that starts the next block, or EOT.
    WaitHeader,
    /// Header seen, the block number byte is next.
    BlockNumber,
    /// The one's complement of the block number is next.
    BlockNumberComplement,
    /// Collecting the payload.
    Data,
    /// Payload complete, the high CRC byte is next.
    CrcHigh,
    /// The low CRC byte is next.
    CrcLow,
    /// A new block passed the CRC check and waits for
    /// [`process()`](XmodemServer::process) to collect it.
    BlockReady,
    /// The sender finished the transfer with EOT.
    Successful,
    /// Too many errors, or the transfer was aborted. CAN has been sent.
    Failure,
}

impl State {
    /// True for the states a session never leaves.
    pub const fn is_terminal(self) -> bool {
        matches!(self, State::Successful | State::Failure)
    }
}

/// Receiving side of the XMODEM-CRC protocol.
///
/// The server is driven from two entry points:
///
/// * [`receive_byte()`](Self::receive_byte) for every byte that arrives from
///   the sender. It does a bounded amount of work and can be called from a
///   receive callback.
/// * [`process()`](Self::process), polled every few milliseconds with the
///   current time. It runs the timeouts and copies out completed blocks.
///
/// Neither entry point locks anything. If they are called from different
/// contexts (an interrupt and a task, say) the caller has to serialize them.
///
/// `N` is the capacity of the packet buffer. The default of 128 fits plain
/// XMODEM; receiving XMODEM-1K blocks needs `N >= 1024` and
/// [`Config::accept_1k_blocks`].
///
/// # Example
///
/// ```
/// use xmodem_proto::{crc16, XmodemServer};
///
/// let mut server = XmodemServer::new(Vec::<u8>::new());
/// let data = [0x1a; 128];
/// let crc = crc16(&data);
///
/// for byte in [0x01, 0x01, 0xfe] {
///     server.receive_byte(byte);
/// }
/// for byte in data {
///     server.receive_byte(byte);
/// }
/// server.receive_byte((crc >> 8) as u8);
/// assert!(server.receive_byte(crc as u8));
///
/// let mut out = [0; 128];
/// let block = server.process(&mut out, 20).unwrap().unwrap();
/// assert_eq!((block.number, block.len), (0, 128));
/// assert_eq!(server.transmitter(), &[b'C', 0x06]);
/// ```
pub struct XmodemServer<T, const N: usize = BLOCK_SIZE> {
    tx: T,
    config: Config,
    state: State,
    packet: ArrayVec<u8, N>,
    packet_size: usize,
    expected_crc: u16,
    repeated_block: bool,
    // Zero until the first call to process().
    last_event_ms: u32,
    block_counter: u32,
    error_count: u32,
}

impl<T: Transmit> XmodemServer<T, BLOCK_SIZE> {
    /// Start a new transfer with the default [`Config`].
    ///
    /// Sends `'C'` to tell the sender that the receiver is ready and wants
    /// CRC-16 checked blocks.
    pub fn new(tx: T) -> Self {
        Self::start(tx, Config::default())
    }
}

impl<T: Transmit, const N: usize> XmodemServer<T, N> {
    /// Start a new transfer with a custom configuration.
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `config` can't work with a packet
    /// buffer of `N` bytes. Nothing is transmitted in that case.
    pub fn with_config(tx: T, config: Config) -> Result<Self, Error> {
        config.validate(N)?;
        Ok(Self::start(tx, config))
    }

    fn start(mut tx: T, config: Config) -> Self {
        tx.transmit(CRC_MODE);
        debug!("XMODEM receiver started");
        Self {
            tx,
            config,
            state: State::Start,
            packet: ArrayVec::new(),
            packet_size: BLOCK_SIZE,
            expected_crc: 0,
            repeated_block: false,
            last_event_ms: 0,
            block_counter: 0,
            error_count: 0,
        }
    }

    /// End the session and return the transmitter. Nothing is sent; if the
    /// sender should be told, transmit CAN yourself or use
    /// [`abort()`](Self::abort) first.
    pub fn deinit(self) -> T {
        self.tx
    }

    /// Feed one received byte into the state machine.
    ///
    /// Returns true when a block is ready to be collected with
    /// [`process()`](Self::process). Bytes arriving while a block is ready,
    /// or after the session has ended, are ignored.
    pub fn receive_byte(&mut self, byte: u8) -> bool {
        use State::*;

        let next = match self.state {
            Start | WaitHeader => self.header(byte),
            BlockNumber => self.block_number(byte),
            BlockNumberComplement => self.block_number_complement(byte),
            Data => {
                // Capacity is checked against the largest block size at construction.
                self.packet.push(byte);
                if self.packet.len() < self.packet_size {
                    Data
                } else {
                    CrcHigh
                }
            }
            CrcHigh => {
                self.expected_crc = u16::from(byte) << 8;
                CrcLow
            }
            CrcLow => {
                self.expected_crc |= u16::from(byte);
                self.check_block()
            }
            BlockReady | Successful | Failure => self.state,
        };
        self.state = next;
        self.state == BlockReady
    }

    /// Run timeouts and hand out a completed block.
    ///
    /// Call this regularly, well below the 500 ms nudge interval, whether or
    /// not bytes have arrived. `now_ms` is a free running millisecond clock;
    /// wrap-around is handled.
    ///
    /// When a block is ready it is copied into `out`, acknowledged, and
    /// described by the returned [`Block`]. Otherwise `Ok(None)` is returned.
    /// # Errors
    /// Returns [`Error::BufferTooSmall`] if `out` can't hold the ready block.
    /// The block stays ready, so the call can be repeated with a bigger buffer.
    pub fn process(&mut self, out: &mut [u8], now_ms: u32) -> Result<Option<Block>, Error> {
        if self.is_done() {
            return Ok(None);
        }

        // Zero marks the timer as unset, so a real timestamp of zero is moved by 1 ms.
        let now = now_ms.max(1);
        if self.last_event_ms == 0 {
            self.last_event_ms = now;
        }

        if self.state == State::Start && self.elapsed(now) > self.config.nudge_interval_ms {
            trace!("No sender yet, repeating 'C'");
            self.tx.transmit(CRC_MODE);
            self.last_event_ms = now;
        }

        if self.elapsed(now) > self.config.packet_timeout_ms {
            self.error_count += 1;
            warn!(
                "Timeout in state {:?} (error {}/{})",
                self.state, self.error_count, self.config.max_errors
            );
            self.tx.transmit(NAK);
            self.state = State::WaitHeader;
            self.last_event_ms = now;
        }

        if self.error_count >= self.config.max_errors {
            warn!(
                "Giving up after {} errors, cancelling transfer",
                self.error_count
            );
            self.fail();
            return Ok(None);
        }

        if self.state != State::BlockReady {
            return Ok(None);
        }

        let len = self.packet.len();
        if out.len() < len {
            return BufferTooSmallSnafu {
                needed: len,
                available: out.len(),
            }
            .fail();
        }
        out[..len].copy_from_slice(&self.packet);

        let block = Block {
            number: self.block_counter,
            len,
        };
        self.block_counter += 1;
        self.tx.transmit(ACK);
        self.state = State::WaitHeader;
        self.last_event_ms = now;
        debug!("Delivered block {} ({} bytes)", block.number, len);
        Ok(Some(block))
    }

    /// Cancel the transfer: send CAN and enter [`State::Failure`].
    /// Does nothing if the session has already ended.
    pub fn abort(&mut self) {
        if !self.is_done() {
            warn!("Transfer aborted by the caller");
            self.fail();
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> State {
        self.state
    }

    /// True once the transfer has succeeded or failed.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// CRC failures and timeouts counted so far.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Number of blocks delivered through [`process()`](Self::process).
    pub fn block_counter(&self) -> u32 {
        self.block_counter
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transmitter(&self) -> &T {
        &self.tx
    }

    fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.last_event_ms)
    }

    fn fail(&mut self) {
        self.state = State::Failure;
        self.tx.transmit(CAN);
    }

    fn block_size_for(&self, header: u8) -> usize {
        if header == STX && self.config.accept_1k_blocks {
            BLOCK_SIZE_1K
        } else {
            BLOCK_SIZE
        }
    }

    fn header(&mut self, byte: u8) -> State {
        match byte {
            SOH => self.begin_block(byte),
            STX if self.config.accept_1k_blocks => self.begin_block(byte),
            EOT => {
                debug!("EOT received after {} blocks", self.block_counter);
                self.tx.transmit(ACK);
                State::Successful
            }
            _ => State::WaitHeader,
        }
    }

    fn begin_block(&mut self, header: u8) -> State {
        self.packet_size = self.block_size_for(header);
        State::BlockNumber
    }

    // On-wire number of the last delivered block, and of the one expected next.
    fn wire_numbers(&self) -> (u8, u8) {
        let last = self.block_counter as u8;
        (last, last.wrapping_add(1))
    }

    fn block_number(&mut self, byte: u8) -> State {
        let (last, next) = self.wire_numbers();
        if byte == next {
            self.repeated_block = false;
            State::BlockNumberComplement
        } else if byte == last && self.block_counter > 0 {
            self.repeated_block = true;
            State::BlockNumberComplement
        } else {
            self.resync(byte)
        }
    }

    fn block_number_complement(&mut self, byte: u8) -> State {
        let (last, next) = self.wire_numbers();
        let expected = if self.repeated_block { last } else { next };
        if byte == !expected {
            self.packet.clear();
            State::Data
        } else {
            self.resync(byte)
        }
    }

    fn resync(&mut self, byte: u8) -> State {
        if byte == SOH || byte == STX {
            debug!("Stray header byte {:#04x}, restarting block", byte);
            self.begin_block(byte)
        } else {
            debug!("Unexpected byte {:#04x}, waiting for header", byte);
            State::WaitHeader
        }
    }

    fn check_block(&mut self) -> State {
        let crc = crc16(&self.packet);
        if crc != self.expected_crc {
            self.error_count += 1;
            warn!(
                "CRC mismatch: got {:#06x}, computed {:#06x} (error {}/{})",
                self.expected_crc, crc, self.error_count, self.config.max_errors
            );
            self.tx.transmit(NAK);
            State::WaitHeader
        } else if self.repeated_block {
            debug!("Repeated block {}, not delivered again", self.block_counter);
            if self.config.ack_duplicates {
                self.tx.transmit(ACK);
            }
            State::WaitHeader
        } else {
            State::BlockReady
        }
    }
}

impl<T, const N: usize> fmt::Debug for XmodemServer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmodemServer")
            .field("state", &self.state)
            .field("packet_len", &self.packet.len())
            .field("packet_size", &self.packet_size)
            .field("block_counter", &self.block_counter)
            .field("error_count", &self.error_count)
            .field("config", &self.config)
            .finish()
    }
}
