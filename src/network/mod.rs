//! This module provides the networking functionality.
//!
//! Every pair of parties shares one connection, either TLS-protected or plain TCP. The connections of
//! one party are bundled into a [Player] that the protocols use to send and receive framed messages.
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection, StreamOwned};
use serde::Deserialize;
use std::borrow::Borrow;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fs, io, thread};
use tracing::debug;

use crate::party::error::{MpcError, MpcResult};

mod local;
mod player;

pub use local::{LocalNetwork, LocalPlayer};
pub use player::{ChannelPlayer, Player, PlayerExt, ThreadPlayer};

pub trait NetSerializable: Sized {
    /// Returns the size in byte of a serialization of n_elements many elements
    fn serialized_size(n_elements: usize) -> usize;

    /// Serializes the elements
    fn as_byte_vec(it: impl IntoIterator<Item = impl Borrow<Self>>, len: usize) -> Vec<u8>;

    /// Serializes the elements
    fn as_byte_vec_slice(elements: &[Self]) -> Vec<u8>;

    /// Deserializes elements from a byte vector
    fn from_byte_vec(v: Vec<u8>, len: usize) -> Vec<Self>;

    /// Deserializes elements from a byte vector into a slice
    fn from_byte_slice(v: Vec<u8>, dest: &mut [Self]);
}

/// How the connections of a worker thread are established and driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// One TLS connection per peer, driven by a non-blocking pump.
    Encrypted,
    /// One plain TCP connection per peer, driven by a non-blocking pump.
    #[default]
    Plain,
    /// One plain TCP connection per peer with a dedicated receive thread each.
    ReceiveThreads,
}

/// Key material for the encrypted transport.
struct TlsConfig {
    player_certs: Vec<CertificateDer<'static>>,
    my_cert: CertificateDer<'static>,
    my_key: PrivateKeyDer<'static>,
}

impl Clone for TlsConfig {
    fn clone(&self) -> Self {
        Self {
            player_certs: self.player_certs.clone(),
            my_cert: self.my_cert.clone(),
            my_key: self.my_key.clone_key(),
        }
    }
}

/// The network configuration of a party.
#[derive(Clone)]
pub struct Config {
    player_addr: Vec<Ipv4Addr>,
    player_ports: Vec<u16>,
    transport: TransportMode,
    tls: Option<TlsConfig>,
}

impl Config {
    /// Creates a new network configuration for a party that uses plain connections.
    ///
    /// The inputs are
    /// - `player_addr` - the IP addresses of all parties
    /// - `player_ports` - the base ports of all parties
    /// - `transport` - [TransportMode::Plain] or [TransportMode::ReceiveThreads]
    pub fn new_plain(player_addr: Vec<Ipv4Addr>, player_ports: Vec<u16>, transport: TransportMode) -> Self {
        Self { player_addr, player_ports, transport, tls: None }
    }

    /// Creates a new network configuration for a party that uses TLS connections.
    ///
    /// The inputs are
    /// - `player_addr` - the IP addresses of all parties
    /// - `player_ports` - the base ports of all parties
    /// - `player_certs` - the TLS certificates of all parties
    /// - `my_cert` - the TLS certificate of the local party
    /// - `my_key` - the TLS private key of the local party
    pub fn new_encrypted(
        player_addr: Vec<Ipv4Addr>,
        player_ports: Vec<u16>,
        player_certs: Vec<CertificateDer<'static>>,
        my_cert: CertificateDer<'static>,
        my_key: PrivateKeyDer<'static>,
    ) -> Self {
        Self {
            player_addr,
            player_ports,
            transport: TransportMode::Encrypted,
            tls: Some(TlsConfig { player_certs, my_cert, my_key }),
        }
    }

    pub fn num_players(&self) -> usize {
        self.player_addr.len()
    }

    pub fn transport(&self) -> TransportMode {
        self.transport
    }

    /// The port party `i` listens on for worker thread `thread`.
    pub fn port_of(&self, i: usize, thread: usize) -> u16 {
        self.player_ports[i] + thread as u16
    }

    fn load_certificate_from_file(config_path: &Path, cert_path: &Path) -> io::Result<CertificateDer<'static>> {
        let mut path = PathBuf::from(config_path);
        path.push(cert_path);
        let mut reader = BufReader::new(File::open(&path)?);
        let cert: io::Result<Vec<_>> = rustls_pemfile::certs(&mut reader).collect();
        let cert = cert?;
        if cert.len() != 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Found {} certificates in {}, expected 1", cert.len(), path.display()),
            ));
        }
        Ok(cert[0].clone())
    }

    fn load_private_key_from_file(config_path: &Path, key_path: &Path) -> io::Result<PrivateKeyDer<'static>> {
        let mut path = PathBuf::from(config_path);
        path.push(key_path);
        let mut reader = BufReader::new(File::open(&path)?);
        let key = rustls_pemfile::private_key(&mut reader)?;
        key.ok_or(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid private key in {}", path.display()),
        ))
    }

    /// Loads the [Config]uration from a file and returns the index of the local party.
    pub fn from_file(path: &Path) -> Result<(usize, Self), io::Error> {
        let file_content = fs::read_to_string(path)?;
        Self::from_toml(&file_content, path.parent())
    }

    /// Parses a configuration, relative paths of key material are resolved against `parent_dir`.
    pub fn from_toml(content: &str, parent_dir: Option<&Path>) -> Result<(usize, Self), io::Error> {
        let parsed_config: SerializedConfig =
            toml::from_str(content).map_err(|ser| io::Error::new(io::ErrorKind::InvalidData, format!("{}", ser)))?;
        let n = parsed_config.parties.len();
        if n < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Found {} [[parties]] entries, expected at least 2", n),
            ));
        }
        // check party index is valid 1 <= party_index <= n
        if parsed_config.party_index < 1 || parsed_config.party_index > n {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Invalid party_index: {}; must be 1 <= party_index <= {}",
                    parsed_config.party_index, n
                ),
            ));
        }
        let my_index = parsed_config.party_index - 1;
        let player_addr = parsed_config.parties.iter().map(|p| p.address).collect();
        let player_ports = parsed_config.parties.iter().map(|p| p.port).collect();

        let config = match parsed_config.transport {
            TransportMode::Encrypted => {
                let default_parent_dir = PathBuf::from("./");
                let parent_dir = parent_dir.unwrap_or(&default_parent_dir);
                let player_certs = parsed_config
                    .parties
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let cert = p.certificate.as_ref().ok_or(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("No \"certificate\" field found for party {}", i + 1),
                        ))?;
                        Self::load_certificate_from_file(parent_dir, &PathBuf::from(cert))
                    })
                    .collect::<io::Result<Vec<_>>>()?;
                let key_path = parsed_config.parties[my_index].private_key.as_ref().ok_or(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("No \"private_key\" field found for party {}", parsed_config.party_index),
                ))?;
                let key = Self::load_private_key_from_file(parent_dir, &PathBuf::from(key_path))?;
                let my_cert = player_certs[my_index].clone();
                Self::new_encrypted(player_addr, player_ports, player_certs, my_cert, key)
            }
            transport => Self::new_plain(player_addr, player_ports, transport),
        };
        Ok((my_index, config))
    }
}

/// The serialized network information for one party.
#[derive(Deserialize)]
struct SerializedPartyConfig {
    pub address: Ipv4Addr,
    pub port: u16,
    pub certificate: Option<String>,
    pub private_key: Option<String>,
}

/// The serialized network configuration.
#[derive(Deserialize)]
struct SerializedConfig {
    pub party_index: usize,
    #[serde(default)]
    pub transport: TransportMode,
    pub parties: Vec<SerializedPartyConfig>,
}

/// A connection to one other party.
pub enum Stream {
    /// TLS connection as a client.
    Client(rustls::StreamOwned<ClientConnection, TcpStream>),
    /// TLS connection as a server.
    Server(rustls::StreamOwned<ServerConnection, TcpStream>),
    /// Unprotected TCP connection.
    Plain(TcpStream),
}

impl Stream {
    pub fn as_mut_write(&mut self) -> &mut dyn io::Write {
        match self {
            Stream::Client(stream) => stream,
            Stream::Server(stream) => stream,
            Stream::Plain(stream) => stream,
        }
    }

    pub fn as_mut_read(&mut self) -> &mut dyn io::Read {
        match self {
            Stream::Client(stream) => stream,
            Stream::Server(stream) => stream,
            Stream::Plain(stream) => stream,
        }
    }

    pub fn tcp_stream(&self) -> &TcpStream {
        match self {
            Stream::Client(stream) => &stream.sock,
            Stream::Server(stream) => &stream.sock,
            Stream::Plain(stream) => stream,
        }
    }

    /// Drives the TLS handshake to completion, a no-op for plain connections.
    pub fn complete_handshake_blocking(&mut self) -> io::Result<()> {
        match self {
            Self::Client(stream) => stream.conn.complete_io(&mut stream.sock).map(|_| ()),
            Self::Server(stream) => stream.conn.complete_io(&mut stream.sock).map(|_| ()),
            Self::Plain(_) => Ok(()),
        }
    }

    /// Closes the connection.
    pub fn teardown(self) -> io::Result<()> {
        match self {
            Self::Client(mut stream) => {
                stream.sock.set_nonblocking(false)?;
                stream.conn.send_close_notify();
                while stream.conn.wants_write() {
                    stream.conn.write_tls(&mut stream.sock)?;
                }
            }
            Self::Server(mut stream) => {
                stream.sock.set_nonblocking(false)?;
                stream.conn.send_close_notify();
                while stream.conn.wants_write() {
                    stream.conn.write_tls(&mut stream.sock)?;
                }
            }
            Self::Plain(mut stream) => {
                stream.set_nonblocking(false)?;
                stream.flush()?;
                match stream.shutdown(std::net::Shutdown::Write) {
                    // the peer may have closed first
                    Err(e) if e.kind() != ErrorKind::NotConnected => return Err(e),
                    _ => (),
                }
            }
        }
        Ok(())
    }
}

/// Writes `data` as one frame: its length as big-endian u64 followed by the bytes.
pub(crate) fn encode_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + data.len());
    frame.extend_from_slice(&(data.len() as u64).to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Removes and returns the first complete frame from `buffer`, if any.
pub(crate) fn decode_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    if buffer.len() < 8 {
        return None;
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&buffer[..8]);
    let len = u64::from_be_bytes(len) as usize;
    if buffer.len() < 8 + len {
        return None;
    }
    let frame = buffer[8..8 + len].to_vec();
    buffer.drain(..8 + len);
    Some(frame)
}

/// The listening socket of a party before it is connected to the others.
pub struct CreatedParty {
    i: usize,
    server_socket: TcpListener,
}

impl CreatedParty {
    /// Binds the interface of party to the given address and port.
    ///
    /// This function also defines the index of the party.
    pub fn bind(i: usize, addr: IpAddr, port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((addr, port))?;
        Ok(Self { i, server_socket: listener })
    }

    /// Returns the port of the [CreatedParty].
    pub fn port(&self) -> io::Result<u16> {
        self.server_socket.local_addr().map(|socket_addr| socket_addr.port())
    }

    /// Establishes a connection with every other party.
    ///
    /// Party `i` acts as client towards all parties `j < i` and as server for all parties `j > i`.
    /// A client announces its index as the first message on the connection.
    ///
    /// The inputs are
    /// - `self` - the basic network interface
    /// - `config` - the network configuration
    /// - `thread` - the worker thread this connection belongs to, added to the base port of the peers
    /// - `timeout` - an optional timeout value
    ///
    /// Returns one stream per party, `None` at the own index.
    pub fn connect(self, config: &Config, thread: usize, timeout: Option<Duration>) -> io::Result<Vec<Option<Stream>>> {
        let n = config.num_players();
        let mut streams: Vec<Option<Stream>> = (0..n).map(|_| None).collect();
        for to in 0..self.i {
            let mut stream = new_client(config, self.i, to, thread, timeout)?;
            stream.complete_handshake_blocking()?;
            stream.as_mut_write().write_all(&(self.i as u64).to_be_bytes())?;
            stream.as_mut_write().flush()?;
            debug!(party = self.i, peer = to, thread, "connected as client");
            streams[to] = Some(stream);
        }
        for _ in self.i + 1..n {
            let (stream, from) = new_server(config, self.i, &self.server_socket)?;
            if from <= self.i || from >= n || streams[from].is_some() {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("Unexpected connection from party {}", from),
                ));
            }
            verify_peer_certificate(config, &stream, from)?;
            debug!(party = self.i, peer = from, thread, "connected as server");
            streams[from] = Some(stream);
        }
        Ok(streams)
    }
}

fn new_server_config(tls: &TlsConfig, my_index: usize) -> io::Result<ServerConfig> {
    let mut root_store = RootCertStore::empty();
    for cert in tls.player_certs.iter().skip(my_index + 1) {
        root_store.add(cert.clone()).map_err(tls_error)?;
    }
    let client_verifier = WebPkiClientVerifier::builder(root_store.into()).build().map_err(tls_error)?;
    ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(vec![tls.my_cert.clone()], tls.my_key.clone_key())
        .map_err(tls_error)
}

fn new_client_config(tls: &TlsConfig, to: usize) -> io::Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.add(tls.player_certs[to].clone()).map_err(tls_error)?;
    ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_root_certificates(root_store)
        .with_client_auth_cert(vec![tls.my_cert.clone()], tls.my_key.clone_key())
        .map_err(tls_error)
}

fn tls_error<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, format!("TLS setup failed: {}", err))
}

/// Accepts the next connection and reads the index the client announces.
///
/// Reading the index also drives the TLS handshake.
fn new_server(config: &Config, my_index: usize, server_socket: &TcpListener) -> io::Result<(Stream, usize)> {
    let (sock, _) = server_socket.accept()?;
    sock.set_nodelay(true)?;
    let mut stream = match &config.tls {
        Some(tls) => {
            let conn = ServerConnection::new(Arc::new(new_server_config(tls, my_index)?)).map_err(tls_error)?;
            Stream::Server(StreamOwned::new(conn, sock))
        }
        None => Stream::Plain(sock),
    };
    let mut index = [0u8; 8];
    stream.as_mut_read().read_exact(&mut index)?;
    Ok((stream, u64::from_be_bytes(index) as usize))
}

/// Connects to party `to` and retries until `timeout` (or forever) while the peer is not yet listening.
fn new_client(config: &Config, me: usize, to: usize, thread: usize, timeout: Option<Duration>) -> io::Result<Stream> {
    let addr: Ipv4Addr = config.player_addr[to];
    let port = config.port_of(to, thread);
    // try to connect in a loop until timeout is reached (if timeout is None, try forever)
    let start_time = Instant::now();
    let sock = {
        loop {
            match TcpStream::connect((addr, port)) {
                Ok(sock) => break Ok(sock),
                Err(io_err) => {
                    if io_err.kind() != ErrorKind::ConnectionRefused {
                        break Err(io_err);
                    }
                }
            }
            if let Some(timeout) = timeout {
                if start_time.elapsed() >= timeout {
                    break Err(io::Error::new(
                        ErrorKind::NotConnected,
                        format!("Cannot connect to {}:{} after {}s", addr, port, timeout.as_secs_f32()),
                    ));
                }
            }
            thread::sleep(Duration::from_millis(100));
        }
    }?;
    sock.set_nodelay(true)?;
    debug!(party = me, peer = to, port, "tcp connection established");
    match &config.tls {
        Some(tls) => {
            let conn = ClientConnection::new(
                Arc::new(new_client_config(tls, to)?),
                ServerName::IpAddress(rustls::pki_types::IpAddr::V4(addr.into())),
            )
            .map_err(tls_error)?;
            Ok(Stream::Client(StreamOwned::new(conn, sock)))
        }
        None => Ok(Stream::Plain(sock)),
    }
}

/// Checks that the certificate a client presented belongs to the index it announced.
fn verify_peer_certificate(config: &Config, stream: &Stream, from: usize) -> io::Result<()> {
    if let (Some(tls), Stream::Server(stream)) = (&config.tls, stream) {
        let presented = stream.conn.peer_certificates().and_then(|certs| certs.first());
        if presented != Some(&tls.player_certs[from]) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("Party {} presented a certificate that is not its own", from),
            ));
        }
    }
    Ok(())
}

/// Connects worker thread `thread` of party `my_index` to all other parties with the configured transport.
pub fn connect_player(
    my_index: usize,
    config: &Config,
    thread: usize,
    timeout: Option<Duration>,
) -> MpcResult<Box<dyn Player>> {
    let party = CreatedParty::bind(
        my_index,
        IpAddr::V4(config.player_addr[my_index]),
        config.port_of(my_index, thread),
    )?;
    let streams = party.connect(config, thread, timeout)?;
    match config.transport {
        TransportMode::Encrypted | TransportMode::Plain => Ok(Box::new(ChannelPlayer::new(my_index, streams)?)),
        TransportMode::ReceiveThreads => {
            let sockets = streams
                .into_iter()
                .map(|s| match s {
                    None => Ok(None),
                    Some(Stream::Plain(sock)) => Ok(Some(sock)),
                    Some(_) => Err(MpcError::Config("receive threads require plain connections".to_string())),
                })
                .collect::<MpcResult<Vec<_>>>()?;
            Ok(Box::new(ThreadPlayer::new(my_index, sockets)?))
        }
    }
}
