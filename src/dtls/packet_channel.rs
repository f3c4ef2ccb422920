use core::fmt;
use std::{
    io::{self, Cursor, Read, Write},
    sync::mpsc::{Receiver, RecvTimeoutError, Sender},
    time::Duration,
};

/// Read/Write adapter between OpenSSL and the ICE component.
///
/// The ICE loop demultiplexes inbound datagrams (first byte 20..63, RFC 7983)
/// and pushes them into `rx`; everything OpenSSL writes goes out through `tx`
/// and is sent on the selected candidate pair by the component. Reads block
/// up to `read_timeout` and then surface `WouldBlock`, which keeps the
/// handshake loop responsive to the handle's stop flag.
pub struct PacketChannel {
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
    reader: Cursor<Vec<u8>>,
    read_timeout: Duration,
}

impl fmt::Debug for PacketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketChannel")
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl PacketChannel {
    pub fn new(rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>, read_timeout: Duration) -> Self {
        Self {
            rx,
            tx,
            reader: Cursor::new(Vec::new()),
            read_timeout,
        }
    }
}

impl Read for PacketChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // pending bytes from the previous datagram first
        if self.reader.position() < self.reader.get_ref().len() as u64 {
            return self.reader.read(buf);
        }
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(datagram) => {
                self.reader = Cursor::new(datagram);
                self.reader.read(buf)
            }
            Err(RecvTimeoutError::Timeout) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::from(io::ErrorKind::ConnectionAborted))
            }
        }
    }
}

impl Write for PacketChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionAborted))?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
