//! An in-process transport, with the engine side played by a
//! [`LoopbackPeer`].

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::{EngineError, EngineEvent, EngineRequest, EngineResult, RequestId, Transport};
use crate::module::RemoteId;

/// The session side of a loopback connection.
#[derive(Debug)]
pub struct LoopbackTransport {
    requests: Sender<EngineRequest>,
    events: Receiver<EngineEvent>,
    bound: bool,
}

/// The engine side of a loopback connection.
#[derive(Debug)]
pub struct LoopbackPeer {
    requests: Receiver<EngineRequest>,
    events: Sender<EngineEvent>,
    next_remote_id: i32,
}

/// Creates a connected transport/peer pair.
pub fn loopback() -> (LoopbackTransport, LoopbackPeer) {
    let (mut transport, peer) = loopback_unbound();
    transport.bound = true;
    (transport, peer)
}

/// Creates a pair whose transport cannot send until the peer has announced
/// its port.
pub fn loopback_unbound() -> (LoopbackTransport, LoopbackPeer) {
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    (
        LoopbackTransport {
            requests: request_tx,
            events: event_rx,
            bound: false,
        },
        LoopbackPeer {
            requests: request_rx,
            events: event_tx,
            next_remote_id: 1000,
        },
    )
}

impl Transport for LoopbackTransport {
    fn send(&mut self, request: &EngineRequest) -> EngineResult<()> {
        if !self.bound {
            return Err(EngineError::NotConnected);
        }
        self.requests
            .send(request.clone())
            .map_err(|_| EngineError::Disconnected)
    }

    fn poll(&mut self, events: &mut Vec<EngineEvent>) -> EngineResult<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(EngineError::Disconnected),
            }
        }
    }

    fn bind_reply_port(&mut self, _port: u16) -> EngineResult<()> {
        self.bound = true;
        Ok(())
    }
}

impl LoopbackPeer {
    fn emit(&self, event: EngineEvent) {
        // a dropped transport simply stops listening
        let _ = self.events.send(event);
    }

    pub fn announce_port(&self, port: u16) {
        self.emit(EngineEvent::PortAnnounced(port));
    }

    pub fn announce_ready(&self) {
        self.emit(EngineEvent::Ready);
    }

    pub fn post_line(&self, line: impl Into<String>) {
        self.emit(EngineEvent::Line(line.into()));
    }

    pub fn reply_instance(&self, request: RequestId, remote_id: RemoteId) {
        self.emit(EngineEvent::InstanceCreated { request, remote_id });
    }

    pub fn stop(&self) {
        self.emit(EngineEvent::Stopped);
    }

    pub fn try_recv(&mut self) -> Option<EngineRequest> {
        self.requests.try_recv().ok()
    }

    /// Takes every request received so far.
    pub fn drain(&mut self) -> Vec<EngineRequest> {
        self.requests.try_iter().collect()
    }

    /// Answers every request received so far, like a well-behaved engine:
    /// each instance request gets the next remote id.
    ///
    /// Returns the requests that were handled.
    pub fn serve(&mut self) -> Vec<EngineRequest> {
        let requests = self.drain();
        for request in &requests {
            self.respond(request);
        }
        requests
    }

    fn respond(&mut self, message: &EngineRequest) {
        match message {
            EngineRequest::CreateInstance { template, request } => {
                let remote_id = RemoteId(self.next_remote_id);
                self.next_remote_id += 1;
                self.post_line(format!("created {template} as {remote_id}"));
                self.reply_instance(*request, remote_id);
            }
            EngineRequest::InstallTemplate { template, .. } => {
                self.post_line(format!("installed {template}"));
            }
            EngineRequest::FreeInstance { remote_id } => {
                self.post_line(format!("freed {remote_id}"));
            }
            EngineRequest::SetDebug(_) => {}
        }
    }

    /// Runs the peer on its own thread until the transport is dropped.
    pub fn spawn(mut self) -> JoinHandle<Self> {
        std::thread::spawn(move || {
            while let Ok(request) = self.requests.recv() {
                self.respond(&request);
            }
            self
        })
    }
}
