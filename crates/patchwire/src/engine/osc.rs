//! OSC over UDP, the way the remote audio engine talks.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType};

use super::{EngineError, EngineEvent, EngineRequest, EngineResult, Transport};
use crate::{config::EngineConfig, module::RemoteId};

const RECV_BUFFER_SIZE: usize = 1536;

pub const INSTALL: &str = "/patchwire/install";
pub const NEW: &str = "/patchwire/new";
pub const FREE: &str = "/patchwire/free";
pub const DEBUG: &str = "/patchwire/debug";

pub const PORT: &str = "/patchwire/port";
pub const READY: &str = "/patchwire/ready";
pub const LINE: &str = "/patchwire/line";
pub const INSTANCE: &str = "/patchwire/instance";

pub fn encode_request(request: &EngineRequest) -> OscMessage {
    let (addr, args) = match request {
        EngineRequest::InstallTemplate { template, code } => (
            INSTALL,
            vec![
                OscType::String(template.to_string()),
                OscType::String(code.clone()),
            ],
        ),
        EngineRequest::CreateInstance { template, request } => (
            NEW,
            vec![
                OscType::String(template.to_string()),
                OscType::Int(*request as i32),
            ],
        ),
        EngineRequest::FreeInstance { remote_id } => (FREE, vec![OscType::Int(remote_id.0)]),
        EngineRequest::SetDebug(enabled) => (DEBUG, vec![OscType::Bool(*enabled)]),
    };
    OscMessage {
        addr: addr.to_string(),
        args,
    }
}

/// Decodes an engine message. Unknown addresses and malformed arguments
/// yield `None`.
pub fn decode_event(message: &OscMessage) -> Option<EngineEvent> {
    match (message.addr.as_str(), message.args.as_slice()) {
        (PORT, [OscType::Int(port)]) => u16::try_from(*port).ok().map(EngineEvent::PortAnnounced),
        (READY, _) => Some(EngineEvent::Ready),
        (LINE, [OscType::String(line)]) => Some(EngineEvent::Line(line.clone())),
        (INSTANCE, [OscType::Int(request), OscType::Int(remote_id)]) => {
            Some(EngineEvent::InstanceCreated {
                request: u32::try_from(*request).ok()?,
                remote_id: RemoteId(*remote_id),
            })
        }
        _ => None,
    }
}

/// A non-blocking UDP socket exchanging OSC packets with the engine.
#[derive(Debug)]
pub struct OscTransport {
    socket: UdpSocket,
    host: String,
    remote: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl OscTransport {
    pub fn bind(config: &EngineConfig) -> EngineResult<Self> {
        let socket = UdpSocket::bind((config.host.as_str(), config.local_port))?;
        socket.set_nonblocking(true)?;
        log::debug!("OSC transport bound to {}", socket.local_addr()?);
        Ok(Self {
            socket,
            host: config.host.clone(),
            remote: None,
            buf: vec![0; RECV_BUFFER_SIZE],
        })
    }

    pub fn local_addr(&self) -> EngineResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn handle_packet(packet: OscPacket, events: &mut Vec<EngineEvent>) {
        match packet {
            OscPacket::Message(message) => match decode_event(&message) {
                Some(event) => events.push(event),
                None => log::debug!("Ignoring OSC message {}", message.addr),
            },
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    Self::handle_packet(packet, events);
                }
            }
        }
    }
}

impl Transport for OscTransport {
    fn send(&mut self, request: &EngineRequest) -> EngineResult<()> {
        let remote = self.remote.ok_or(EngineError::NotConnected)?;
        let packet = OscPacket::Message(encode_request(request));
        let bytes = rosc::encoder::encode(&packet)
            .map_err(|e| EngineError::Encode(format!("{e:?}")))?;
        self.socket.send_to(&bytes, remote)?;
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<EngineEvent>) -> EngineResult<()> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((size, _src)) => match rosc::decoder::decode_udp(&self.buf[..size]) {
                    Ok((_, packet)) => Self::handle_packet(packet, events),
                    Err(e) => log::warn!("Dropping malformed OSC packet: {e:?}"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn bind_reply_port(&mut self, port: u16) -> EngineResult<()> {
        let remote = (self.host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or(EngineError::NotConnected)?;
        self.remote = Some(remote);
        Ok(())
    }
}
