// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport};
use log::{info, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// The maximum data that we're willing to receive in one frame.
///
/// The server will close the connection with roughly a megabyte of data,
/// so anything larger than that means the stream is out of sync.
const MAXIMUM_DATA: usize = (1024 * 1024) + (8 * 1024);

/// A [`Transport`] over TCP speaking the [intermediate transport]: every
/// frame is prefixed with its 4-byte little-endian length, and the very
/// first thing the client sends is the `0xeeeeeeee` tag.
///
/// ```text
/// +----+----...----+
/// | len|  payload  |
/// +----+----...----+
///  ^^^^ 4 bytes
/// ```
///
/// [intermediate transport]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
pub struct TcpTransport {
    addr: SocketAddr,
    read_timeout: Option<Duration>,

    // Clones of the same stream, so a blocked reader never starves a
    // writer and `close` can shut both down.
    reader: Mutex<Option<TcpStream>>,
    writer: Mutex<Option<TcpStream>>,
    closer: Mutex<Option<TcpStream>>,

    connected: AtomicBool,
    init_sent: AtomicBool,
}

impl TcpTransport {
    const TAG: [u8; 4] = 0xee_ee_ee_ee_u32.to_le_bytes();

    pub fn new(addr: SocketAddr) -> Self {
        Self::with_read_timeout(addr, Some(Duration::from_secs(5)))
    }

    /// Create a transport whose `recv` gives up with [`Error::Timeout`]
    /// after the given duration with no incoming data.
    pub fn with_read_timeout(addr: SocketAddr, read_timeout: Option<Duration>) -> Self {
        Self {
            addr,
            read_timeout,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closer: Mutex::new(None),
            connected: AtomicBool::new(false),
            init_sent: AtomicBool::new(false),
        }
    }

    fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> io::Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        info!("connecting to {}", self.addr);
        let stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_nodelay(true)?;

        *self.reader.lock().unwrap() = Some(stream.try_clone()?);
        *self.closer.lock().unwrap() = Some(stream.try_clone()?);
        *self.writer.lock().unwrap() = Some(stream);
        self.init_sent.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.drop_connection();
        if let Some(stream) = self.closer.lock().unwrap().take() {
            // Unblocks any reader stuck on `recv`.
            let _ = stream.shutdown(Shutdown::Both);
        }
        *self.reader.lock().unwrap() = None;
        *self.writer.lock().unwrap() = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, data: &[u8]) -> Result<(), Error> {
        let mut guard = self.writer.lock().unwrap();
        let stream = match guard.as_mut() {
            Some(stream) if self.is_connected() => stream,
            _ => return Err(Error::Closed),
        };

        let mut packet = Vec::with_capacity(Self::TAG.len() + 4 + data.len());
        if !self.init_sent.load(Ordering::SeqCst) {
            packet.extend(Self::TAG);
        }
        packet.extend((data.len() as i32).to_le_bytes());
        packet.extend(data);

        match stream.write_all(&packet).and_then(|_| stream.flush()) {
            Ok(()) => {
                self.init_sent.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!("send failed: {}", e);
                self.drop_connection();
                Err(Error::Closed)
            }
        }
    }

    fn recv(&self) -> Result<Vec<u8>, Error> {
        let mut guard = self.reader.lock().unwrap();
        let stream = match guard.as_mut() {
            Some(stream) if self.is_connected() => stream,
            _ => return Err(Error::Closed),
        };

        // Only the wait for the first byte is allowed to time out; once
        // a frame starts, failing to read the rest means the stream can
        // no longer be trusted to be in sync.
        let mut header = [0u8; 4];
        match stream.read_exact(&mut header[..1]) {
            Ok(()) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(Error::Timeout);
            }
            Err(_) => {
                self.drop_connection();
                return Err(Error::Closed);
            }
        }

        if stream.read_exact(&mut header[1..]).is_err() {
            self.drop_connection();
            return Err(Error::Closed);
        }

        let len = i32::from_le_bytes(header);
        if len <= 0 || len as usize > MAXIMUM_DATA {
            // Tiny frames carry a transport-level error status.
            warn!("got bad frame length {}, closing", len);
            self.drop_connection();
            return Err(Error::Closed);
        }

        let mut data = vec![0; len as usize];
        if stream.read_exact(&mut data).is_err() {
            self.drop_connection();
            return Err(Error::Closed);
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn frames_are_length_prefixed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            // Tag, then two framed packets from the client.
            let mut tag = [0u8; 4];
            stream.read_exact(&mut tag).unwrap();
            assert_eq!(tag, TcpTransport::TAG);

            let mut expect_frame = |expected: &[u8]| {
                let mut header = [0u8; 4];
                stream.read_exact(&mut header).unwrap();
                assert_eq!(i32::from_le_bytes(header) as usize, expected.len());
                let mut data = vec![0; expected.len()];
                stream.read_exact(&mut data).unwrap();
                assert_eq!(data, expected);
            };
            expect_frame(b"ping");
            expect_frame(b"pong");

            // One framed packet back.
            stream.write_all(&4i32.to_le_bytes()).unwrap();
            stream.write_all(b"data").unwrap();
        });

        let transport = TcpTransport::new(addr);
        transport.connect().unwrap();
        transport.send(b"ping").unwrap();
        transport.send(b"pong").unwrap();
        assert_eq!(transport.recv().unwrap(), b"data");

        transport.close();
        assert!(!transport.is_connected());
        assert_eq!(transport.recv(), Err(Error::Closed));
        server.join().unwrap();
    }

    #[test]
    fn empty_read_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let transport =
            TcpTransport::with_read_timeout(addr, Some(Duration::from_millis(50)));
        transport.connect().unwrap();
        let (_stream, _) = listener.accept().unwrap();

        assert_eq!(transport.recv(), Err(Error::Timeout));
        // A timeout is recoverable, the connection stays up.
        assert!(transport.is_connected());
        transport.close();
    }
}
