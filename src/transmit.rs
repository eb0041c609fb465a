//! The outgoing half of the serial link, as seen by the receiver.

/// Sink for the control bytes the receiver sends back to the sender.
///
/// Transmission is fire-and-forget: the receiver has no way to act on a lost
/// byte other than its own timeouts. Implementations must not block
/// indefinitely, since they are called from inside
/// [`XmodemServer::process`](crate::XmodemServer::process).
///
/// Any `FnMut(u8)` closure is a `Transmit`, which is the usual way to hand
/// over caller context:
///
/// ```
/// use xmodem_proto::XmodemServer;
/// let mut sent: Vec<u8> = Vec::new();
/// let server = XmodemServer::new(|byte: u8| sent.push(byte));
/// drop(server);
/// assert_eq!(sent, b"C");
/// ```
pub trait Transmit {
    /// Queue one byte for transmission.
    fn transmit(&mut self, byte: u8);
}

impl<F> Transmit for F
where
    F: FnMut(u8),
{
    fn transmit(&mut self, byte: u8) {
        self(byte)
    }
}

#[cfg(feature = "std")]
impl Transmit for std::vec::Vec<u8> {
    fn transmit(&mut self, byte: u8) {
        self.push(byte);
    }
}
