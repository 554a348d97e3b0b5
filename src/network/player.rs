use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{channel, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::party::error::{MpcError, MpcResult};

use super::{decode_frame, encode_frame, NetSerializable, Stream};

/// The connections of one worker thread to all other parties.
///
/// Messages are delivered in order per pair of parties. Sending never blocks on the receiver,
/// so every party may send before it receives.
pub trait Player: Send {
    /// The index of the local party.
    fn my_num(&self) -> usize;

    fn num_players(&self) -> usize;

    fn send_to(&mut self, to: usize, data: &[u8]) -> MpcResult<()>;

    /// Blocks until the next message from party `from` arrives.
    fn receive_from(&mut self, from: usize) -> MpcResult<Vec<u8>>;

    /// Total number of payload bytes sent so far.
    fn bytes_sent(&self) -> u64;

    /// Flushes all pending messages and closes the connections.
    fn teardown(&mut self) -> MpcResult<()>;

    fn next(&self) -> usize {
        (self.my_num() + 1) % self.num_players()
    }

    fn prev(&self) -> usize {
        (self.my_num() + self.num_players() - 1) % self.num_players()
    }

    /// Sends the same message to every other party.
    fn send_all(&mut self, data: &[u8]) -> MpcResult<()> {
        let me = self.my_num();
        for to in (0..self.num_players()).filter(|p| *p != me) {
            self.send_to(to, data)?;
        }
        Ok(())
    }

    /// Receives one message from every other party, the entry of the local party is empty.
    fn receive_all(&mut self) -> MpcResult<Vec<Vec<u8>>> {
        (0..self.num_players())
            .map(|from| {
                if from == self.my_num() {
                    Ok(Vec::new())
                } else {
                    self.receive_from(from)
                }
            })
            .collect()
    }

    /// Sends `data` to everybody and returns all messages, including `data` at the own index.
    fn exchange_all(&mut self, data: &[u8]) -> MpcResult<Vec<Vec<u8>>> {
        self.send_all(data)?;
        let mut received = self.receive_all()?;
        received[self.my_num()] = data.to_vec();
        Ok(received)
    }

    /// Sends to the party `offset` positions ahead and receives from the party `offset` positions behind.
    fn pass_around(&mut self, data: &[u8], offset: usize) -> MpcResult<Vec<u8>> {
        let n = self.num_players();
        self.send_to((self.my_num() + offset) % n, data)?;
        self.receive_from((self.my_num() + n - offset % n) % n)
    }
}

/// Typed messages on top of a [Player].
pub trait PlayerExt: Player {
    fn send_elements<T: NetSerializable>(&mut self, to: usize, elements: &[T]) -> MpcResult<()> {
        self.send_to(to, &T::as_byte_vec_slice(elements))
    }

    /// Receives exactly `len` elements from party `from`.
    fn receive_elements<T: NetSerializable>(&mut self, from: usize, len: usize) -> MpcResult<Vec<T>> {
        let bytes = self.receive_from(from)?;
        if bytes.len() != T::serialized_size(len) {
            return Err(MpcError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "expected {} bytes from party {}, received {}",
                    T::serialized_size(len),
                    from,
                    bytes.len()
                ),
            )));
        }
        Ok(T::from_byte_vec(bytes, len))
    }
}

impl<P: Player + ?Sized> PlayerExt for P {}

const READ_BUFFER_SIZE: usize = 1 << 16;
const SPINS_BEFORE_SLEEP: usize = 64;

/// A non-blocking connection with its pending outgoing and incoming bytes.
struct Channel {
    stream: Stream,
    outbox: Vec<u8>,
    written: usize,
    inbox: Vec<u8>,
    closed: bool,
}

/// Moves bytes between a TLS connection and the outbox/inbox of `$channel` without blocking.
macro_rules! pump_tls {
    ($channel:expr, $tls:expr, $buf:expr) => {{
        let mut progress = false;
        if $channel.written < $channel.outbox.len() {
            let n = $tls.conn.writer().write(&$channel.outbox[$channel.written..])?;
            $channel.written += n;
            progress |= n > 0;
        }
        while $tls.conn.wants_write() {
            match $tls.conn.write_tls(&mut $tls.sock) {
                Ok(n) => progress |= n > 0,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        loop {
            match $tls.conn.read_tls(&mut $tls.sock) {
                Ok(0) => {
                    $channel.closed = true;
                    break;
                }
                Ok(_) => {
                    $tls.conn
                        .process_new_packets()
                        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
                    progress = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        loop {
            match $tls.conn.reader().read($buf) {
                Ok(0) => {
                    // close_notify received
                    $channel.closed = true;
                    break;
                }
                Ok(n) => $channel.inbox.extend_from_slice(&$buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    $channel.closed = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        progress
    }};
}

impl Channel {
    fn new(stream: Stream) -> io::Result<Self> {
        stream.tcp_stream().set_nonblocking(true)?;
        Ok(Self {
            stream,
            outbox: Vec::new(),
            written: 0,
            inbox: Vec::new(),
            closed: false,
        })
    }

    fn has_pending_writes(&self) -> bool {
        let tls_pending = match &self.stream {
            Stream::Client(tls) => tls.conn.wants_write(),
            Stream::Server(tls) => tls.conn.wants_write(),
            Stream::Plain(_) => false,
        };
        self.written < self.outbox.len() || tls_pending
    }

    /// Writes and reads whatever the socket accepts right now. Returns whether any byte moved.
    fn pump(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let progress = match &mut self.stream {
            Stream::Client(tls) => pump_tls!(self, tls, buf),
            Stream::Server(tls) => pump_tls!(self, tls, buf),
            Stream::Plain(sock) => {
                let mut progress = false;
                while self.written < self.outbox.len() {
                    match sock.write(&self.outbox[self.written..]) {
                        Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                        Ok(n) => {
                            self.written += n;
                            progress = true;
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == ErrorKind::Interrupted => (),
                        Err(e) => return Err(e),
                    }
                }
                while !self.closed {
                    match sock.read(buf) {
                        Ok(0) => self.closed = true,
                        Ok(n) => {
                            self.inbox.extend_from_slice(&buf[..n]);
                            progress = true;
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == ErrorKind::Interrupted => (),
                        Err(e) => return Err(e),
                    }
                }
                progress
            }
        };
        if self.written == self.outbox.len() {
            self.outbox.clear();
            self.written = 0;
        }
        Ok(progress)
    }
}

/// A [Player] over TLS or plain TCP connections that are driven by a single-threaded non-blocking pump.
///
/// While waiting for a message the pump keeps flushing all outgoing buffers, so two parties that
/// send large messages to each other at the same time cannot deadlock.
pub struct ChannelPlayer {
    my_num: usize,
    channels: Vec<Option<Channel>>,
    read_buffer: Vec<u8>,
    bytes_sent: u64,
}

impl ChannelPlayer {
    /// Takes one stream per party, `None` at the own index.
    pub fn new(my_num: usize, streams: Vec<Option<Stream>>) -> io::Result<Self> {
        let channels = streams
            .into_iter()
            .map(|s| s.map(Channel::new).transpose())
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            my_num,
            channels,
            read_buffer: vec![0u8; READ_BUFFER_SIZE],
            bytes_sent: 0,
        })
    }

    fn channel(&mut self, party: usize) -> MpcResult<&mut Channel> {
        self.channels
            .get_mut(party)
            .and_then(Option::as_mut)
            .ok_or(MpcError::InvalidParameters(format!("no connection to party {}", party)))
    }

    fn pump_all(&mut self) -> io::Result<bool> {
        let mut progress = false;
        for channel in self.channels.iter_mut().flatten() {
            progress |= channel.pump(&mut self.read_buffer)?;
        }
        Ok(progress)
    }
}

impl Player for ChannelPlayer {
    fn my_num(&self) -> usize {
        self.my_num
    }

    fn num_players(&self) -> usize {
        self.channels.len()
    }

    fn send_to(&mut self, to: usize, data: &[u8]) -> MpcResult<()> {
        let channel = self
            .channels
            .get_mut(to)
            .and_then(Option::as_mut)
            .ok_or(MpcError::InvalidParameters(format!("no connection to party {}", to)))?;
        channel.outbox.extend_from_slice(&encode_frame(data));
        channel.pump(&mut self.read_buffer)?;
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn receive_from(&mut self, from: usize) -> MpcResult<Vec<u8>> {
        let mut idle = 0;
        loop {
            let channel = self.channel(from)?;
            if let Some(frame) = decode_frame(&mut channel.inbox) {
                return Ok(frame);
            }
            if channel.closed {
                return Err(MpcError::Io(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("party {} closed the connection", from),
                )));
            }
            if self.pump_all()? {
                idle = 0;
            } else {
                idle += 1;
                if idle < SPINS_BEFORE_SLEEP {
                    thread::yield_now();
                } else {
                    thread::sleep(Duration::from_micros(100));
                }
            }
        }
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn teardown(&mut self) -> MpcResult<()> {
        while self.channels.iter().flatten().any(Channel::has_pending_writes) {
            if !self.pump_all()? {
                thread::sleep(Duration::from_micros(100));
            }
        }
        for channel in self.channels.iter_mut() {
            if let Some(channel) = channel.take() {
                channel.stream.teardown()?;
            }
        }
        debug!(party = self.my_num, bytes_sent = self.bytes_sent, "connections closed");
        Ok(())
    }
}

/// A [Player] over plain TCP with one blocking receive thread per peer.
pub struct ThreadPlayer {
    my_num: usize,
    writers: Vec<Option<TcpStream>>,
    receivers: Vec<Option<Receiver<io::Result<Vec<u8>>>>>,
    handles: Vec<JoinHandle<()>>,
    bytes_sent: u64,
}

fn receive_loop(from: usize, mut sock: TcpStream, sender: std::sync::mpsc::Sender<io::Result<Vec<u8>>>) {
    loop {
        let mut len = [0u8; 8];
        match sock.read_exact(&mut len) {
            Ok(()) => (),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return,
            Err(e) => {
                let _ = sender.send(Err(e));
                return;
            }
        }
        let mut frame = vec![0u8; u64::from_be_bytes(len) as usize];
        if let Err(e) = sock.read_exact(&mut frame) {
            warn!(peer = from, "connection closed in the middle of a message");
            let _ = sender.send(Err(e));
            return;
        }
        if sender.send(Ok(frame)).is_err() {
            return;
        }
    }
}

impl ThreadPlayer {
    /// Takes one plain socket per party, `None` at the own index.
    pub fn new(my_num: usize, sockets: Vec<Option<TcpStream>>) -> io::Result<Self> {
        let mut receivers = Vec::with_capacity(sockets.len());
        let mut handles = Vec::new();
        for (from, sock) in sockets.iter().enumerate() {
            match sock {
                Some(sock) => {
                    let reader = sock.try_clone()?;
                    let (sender, receiver) = channel();
                    let handle = thread::Builder::new()
                        .name(format!("p{}-recv-{}", my_num, from))
                        .spawn(move || receive_loop(from, reader, sender))?;
                    handles.push(handle);
                    receivers.push(Some(receiver));
                }
                None => receivers.push(None),
            }
        }
        Ok(Self {
            my_num,
            writers: sockets,
            receivers,
            handles,
            bytes_sent: 0,
        })
    }
}

impl Player for ThreadPlayer {
    fn my_num(&self) -> usize {
        self.my_num
    }

    fn num_players(&self) -> usize {
        self.writers.len()
    }

    fn send_to(&mut self, to: usize, data: &[u8]) -> MpcResult<()> {
        let sock = self
            .writers
            .get_mut(to)
            .and_then(Option::as_mut)
            .ok_or(MpcError::InvalidParameters(format!("no connection to party {}", to)))?;
        sock.write_all(&encode_frame(data))?;
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn receive_from(&mut self, from: usize) -> MpcResult<Vec<u8>> {
        let receiver = self
            .receivers
            .get(from)
            .and_then(Option::as_ref)
            .ok_or(MpcError::InvalidParameters(format!("no connection to party {}", from)))?;
        Ok(receiver.recv()??)
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn teardown(&mut self) -> MpcResult<()> {
        for sock in self.writers.iter_mut() {
            if let Some(sock) = sock.take() {
                Stream::Plain(sock).teardown()?;
            }
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!(party = self.my_num, "receive thread panicked");
            }
        }
        self.receivers.clear();
        debug!(party = self.my_num, bytes_sent = self.bytes_sent, "connections closed");
        Ok(())
    }
}
