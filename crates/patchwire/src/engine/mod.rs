//! Coordination with the out-of-process audio engine.
//!
//! Requests are queued and sent on [`RemoteEngine::poll()`], which also
//! receives and handles the engine's replies. Nothing here blocks: a caller
//! that needs a reply gets an [`Eventual`] that is fulfilled during a later
//! poll.

use std::collections::BTreeSet;

use crossbeam_channel::Sender;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    config::EngineConfig,
    module::RemoteId,
    template::{ModuleTemplate, TemplateId},
    util::{Eventual, Promise},
};

pub mod loopback;
#[cfg(feature = "osc")]
pub mod osc;
mod queue;

use queue::RequestQueue;

/// Correlates a [`EngineRequest::CreateInstance`] with its reply.
pub type RequestId = u32;

/// A message to the remote engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRequest {
    InstallTemplate { template: TemplateId, code: String },
    CreateInstance { template: TemplateId, request: RequestId },
    FreeInstance { remote_id: RemoteId },
    SetDebug(bool),
}

/// A message from the remote engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The port the engine listens on; replies to it become possible.
    PortAnnounced(u16),
    Ready,
    /// A free-form status line.
    Line(String),
    InstanceCreated {
        request: RequestId,
        remote_id: RemoteId,
    },
    /// The engine went away. All remote state is lost.
    Stopped,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No reply address is bound yet")]
    NotConnected,

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("The remote engine is gone")]
    Disconnected,

    #[error("Template {0} could not be installed in the remote engine")]
    InstallFailed(TemplateId),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Moves messages between the session and the remote engine.
pub trait Transport: Send {
    /// Sends one request.
    ///
    /// Returns [`EngineError::NotConnected`] if the request cannot be sent
    /// yet; it is retried on the next poll.
    fn send(&mut self, request: &EngineRequest) -> EngineResult<()>;

    /// Appends every event received since the last call to `events`.
    /// Must not block.
    fn poll(&mut self, events: &mut Vec<EngineEvent>) -> EngineResult<()>;

    /// Directs further requests to the engine's announced `port`.
    fn bind_reply_port(&mut self, port: u16) -> EngineResult<()> {
        let _ = port;
        Ok(())
    }
}

/// Process-wide remote engine state: readiness, installed templates and
/// requests in flight.
pub struct RemoteEngine {
    transport: Box<dyn Transport>,
    ready: bool,
    installed: BTreeSet<TemplateId>,
    // installs the transport refused; instances of these are not requested
    rejected: BTreeSet<TemplateId>,
    generation: u64,
    pending: FxHashMap<RequestId, Promise<EngineResult<RemoteId>>>,
    next_request: RequestId,
    queue: RequestQueue,
    events: Vec<EngineEvent>,
}

impl RemoteEngine {
    pub fn new(transport: impl Transport + 'static, config: &EngineConfig) -> Self {
        let engine = Self {
            transport: Box::new(transport),
            ready: false,
            installed: BTreeSet::new(),
            rejected: BTreeSet::new(),
            generation: 0,
            pending: FxHashMap::default(),
            next_request: 0,
            queue: RequestQueue::default(),
            events: Vec::new(),
        };
        if config.osc_debug {
            engine.queue.push(EngineRequest::SetDebug(true));
        }
        engine
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns a sender that enqueues requests from elsewhere.
    pub fn request_sender(&self) -> Sender<EngineRequest> {
        self.queue.sender()
    }

    /// Counts how often all remote state was forgotten. Remote ids handed
    /// out before a change of generation are meaningless to the engine.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn was_installed(&self, template: &TemplateId) -> bool {
        self.installed.contains(template)
    }

    /// Number of instance requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Number of requests not sent yet.
    pub fn queued_requests(&self) -> usize {
        self.queue.len()
    }

    /// Queues the template's remote code for installation, once.
    ///
    /// Returns whether an install request was queued.
    pub fn install_template(&mut self, template: &ModuleTemplate) -> bool {
        let Some(code) = template.remote_code() else {
            return false;
        };
        if !self.installed.insert(template.id().clone()) {
            return false;
        }
        self.rejected.remove(template.id());

        log::debug!("Installing template {} in the remote engine", template.id());
        self.queue.push(EngineRequest::InstallTemplate {
            template: template.id().clone(),
            code: code.to_string(),
        });
        true
    }

    /// Asks the engine for a new instance of `template`.
    ///
    /// The result is an error if the engine stopped before replying or the
    /// template could not be installed.
    pub fn request_instance(&mut self, template: &TemplateId) -> Eventual<EngineResult<RemoteId>> {
        let request = self.next_request;
        self.next_request = self.next_request.wrapping_add(1);

        let (eventual, promise) = Eventual::new();
        self.pending.insert(request, promise);
        self.queue.push(EngineRequest::CreateInstance {
            template: template.clone(),
            request,
        });
        eventual
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.queue.push(EngineRequest::SetDebug(enabled));
    }

    /// Receives and handles all available events, then sends queued requests.
    ///
    /// Returns the number of events handled. Follow-ups registered on
    /// [`request_instance()`](RemoteEngine::request_instance) results run
    /// during this call.
    pub fn poll(&mut self) -> EngineResult<usize> {
        let mut events = std::mem::take(&mut self.events);
        let received = self.transport.poll(&mut events);

        let handled = events.len();
        let mut result = Ok(());
        for event in events.drain(..) {
            if let Err(e) = self.handle_event(event) {
                result = Err(e);
            }
        }
        self.events = events;

        if let Err(e) = received {
            if matches!(e, EngineError::Disconnected) {
                log::warn!("Remote engine transport disconnected");
                self.reset();
            }
            return Err(e);
        }
        result?;

        self.flush()?;
        Ok(handled)
    }

    /// Handles one event. Repeated events are harmless.
    pub fn handle_event(&mut self, event: EngineEvent) -> EngineResult<()> {
        match event {
            EngineEvent::PortAnnounced(port) => {
                log::info!("Remote engine listens on port {port}");
                self.transport.bind_reply_port(port)?;
            }
            EngineEvent::Ready => {
                if !self.ready {
                    log::info!("Remote engine is ready");
                    self.ready = true;
                }
            }
            EngineEvent::Line(line) => {
                log::info!(target: "engine", "{line}");
            }
            EngineEvent::InstanceCreated { request, remote_id } => {
                match self.pending.remove(&request) {
                    Some(promise) => {
                        if promise.fulfill(Ok(remote_id)).is_err() {
                            log::debug!("Nobody waits for {remote_id} anymore, freeing it");
                            self.queue.push(EngineRequest::FreeInstance { remote_id });
                        }
                    }
                    None => {
                        log::debug!("Ignoring reply to unknown request {request} ({remote_id})");
                    }
                }
            }
            EngineEvent::Stopped => {
                log::warn!("Remote engine stopped");
                self.reset();
            }
        }
        Ok(())
    }

    /// Forgets all remote state: the engine is assumed to start from scratch.
    ///
    /// Requests in flight resolve to [`EngineError::Disconnected`].
    pub fn reset(&mut self) {
        self.ready = false;
        self.generation += 1;
        self.installed.clear();
        self.rejected.clear();
        self.queue.clear();
        for (_, promise) in self.pending.drain() {
            let _ = promise.fulfill(Err(EngineError::Disconnected));
        }
    }

    /// Sends queued requests without receiving anything.
    ///
    /// An install the transport refuses is forgotten, so the next creation
    /// queues it again, and the instance requests queued behind it resolve
    /// to [`EngineError::InstallFailed`] instead of being sent.
    pub fn flush(&mut self) -> EngineResult<()> {
        while let Some(request) = self.queue.pop() {
            if let EngineRequest::CreateInstance { template, request: id } = &request {
                if self.rejected.contains(template) {
                    self.refuse_instance(*id, template);
                    continue;
                }
            }
            match self.transport.send(&request) {
                Ok(()) => log::trace!("Sent {request:?}"),
                Err(EngineError::NotConnected) => {
                    self.queue.hold(request);
                    break;
                }
                Err(EngineError::Disconnected) => {
                    log::warn!("Remote engine transport disconnected");
                    self.reset();
                    return Err(EngineError::Disconnected);
                }
                Err(e) => {
                    log::warn!("Dropping request {request:?}: {e}");
                    if let EngineRequest::InstallTemplate { template, .. } = request {
                        self.installed.remove(&template);
                        self.rejected.insert(template);
                    }
                }
            }
        }
        Ok(())
    }

    fn refuse_instance(&mut self, request: RequestId, template: &TemplateId) {
        log::warn!("Not creating an instance of {template}, its install failed");
        if let Some(promise) = self.pending.remove(&request) {
            let _ = promise.fulfill(Err(EngineError::InstallFailed(template.clone())));
        }
    }
}

impl std::fmt::Debug for RemoteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEngine")
            .field("ready", &self.ready)
            .field("generation", &self.generation)
            .field("installed", &self.installed)
            .field("pending", &self.pending.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{loopback::loopback_unbound, *};
    use crate::template::PortDescriptor;

    fn sine() -> ModuleTemplate {
        ModuleTemplate::new("gen", "sine")
            .with_outlet(PortDescriptor::audio("out"))
            .with_remote_code("SinOsc.ar")
    }

    #[test]
    fn test_install_once() {
        let (transport, mut peer) = loopback_unbound();
        let mut engine = RemoteEngine::new(transport, &EngineConfig::default());

        assert!(engine.install_template(&sine()));
        assert!(!engine.install_template(&sine()));
        assert!(!engine.install_template(&ModuleTemplate::new("fx", "gain")));
        assert!(engine.was_installed(sine().id()));

        // nothing goes out before the engine announced its port
        engine.poll().unwrap();
        assert_eq!(peer.try_recv(), None);
        assert_eq!(engine.queued_requests(), 1);

        peer.announce_port(57120);
        engine.poll().unwrap();
        assert_eq!(
            peer.drain(),
            [EngineRequest::InstallTemplate {
                template: TemplateId::new("gen", "sine"),
                code: "SinOsc.ar".to_string(),
            }]
        );
    }

    #[test]
    fn test_requests_keep_their_order() {
        let (transport, mut peer) = loopback_unbound();
        let config = EngineConfig {
            osc_debug: true,
            ..Default::default()
        };
        let mut engine = RemoteEngine::new(transport, &config);
        engine.install_template(&sine());
        let _instance = engine.request_instance(sine().id());

        peer.announce_port(57120);
        engine.poll().unwrap();
        let sent = peer.drain();
        assert!(matches!(
            sent.as_slice(),
            [
                EngineRequest::SetDebug(true),
                EngineRequest::InstallTemplate { .. },
                EngineRequest::CreateInstance { request: 0, .. },
            ]
        ));
    }

    #[test]
    fn test_replies_are_idempotent() {
        let (transport, mut peer) = loopback_unbound();
        let mut engine = RemoteEngine::new(transport, &EngineConfig::default());
        peer.announce_port(57120);
        peer.announce_ready();
        peer.announce_ready();
        assert_eq!(engine.poll().unwrap(), 3);
        assert!(engine.is_ready());

        let mut instance = engine.request_instance(&TemplateId::new("gen", "sine"));
        assert_eq!(engine.pending_requests(), 1);
        peer.reply_instance(0, RemoteId(1000));
        peer.reply_instance(0, RemoteId(1001));
        engine.poll().unwrap();

        assert_eq!(instance.try_take().unwrap().unwrap(), RemoteId(1000));
        assert_eq!(engine.pending_requests(), 0);
        // the duplicate reply did not trigger anything
        assert!(
            peer.drain()
                .iter()
                .all(|r| !matches!(r, EngineRequest::FreeInstance { .. }))
        );
    }

    #[test]
    fn test_abandoned_instance_is_freed() {
        let (transport, mut peer) = loopback_unbound();
        let mut engine = RemoteEngine::new(transport, &EngineConfig::default());
        peer.announce_port(57120);
        engine.poll().unwrap();

        drop(engine.request_instance(&TemplateId::new("gen", "sine")));
        peer.reply_instance(0, RemoteId(7));
        engine.poll().unwrap();
        engine.poll().unwrap();

        assert_eq!(
            peer.drain().last(),
            Some(&EngineRequest::FreeInstance {
                remote_id: RemoteId(7)
            })
        );
    }

    #[test]
    fn test_stop_resets_state() {
        let (transport, mut peer) = loopback_unbound();
        let mut engine = RemoteEngine::new(transport, &EngineConfig::default());
        peer.announce_ready();
        engine.poll().unwrap();
        engine.install_template(&sine());
        let mut instance = engine.request_instance(sine().id());

        peer.stop();
        engine.poll().unwrap();

        assert!(!engine.is_ready());
        assert!(!engine.was_installed(sine().id()));
        assert_eq!(engine.queued_requests(), 0);
        assert!(matches!(
            instance.try_take(),
            Some(Err(EngineError::Disconnected))
        ));
        assert_eq!(engine.generation(), 1);
    }

    /// Refuses the first `installs_left` installs, like a message too big
    /// for one datagram.
    struct RefusingTransport {
        inner: loopback::LoopbackTransport,
        installs_left: usize,
    }

    impl Transport for RefusingTransport {
        fn send(&mut self, request: &EngineRequest) -> EngineResult<()> {
            if matches!(request, EngineRequest::InstallTemplate { .. }) && self.installs_left > 0 {
                self.installs_left -= 1;
                return Err(EngineError::Io(std::io::Error::other("message too long")));
            }
            self.inner.send(request)
        }

        fn poll(&mut self, events: &mut Vec<EngineEvent>) -> EngineResult<()> {
            self.inner.poll(events)
        }

        fn bind_reply_port(&mut self, port: u16) -> EngineResult<()> {
            self.inner.bind_reply_port(port)
        }
    }

    #[test]
    fn test_refused_install_fails_its_instances() {
        let (inner, mut peer) = loopback_unbound();
        let transport = RefusingTransport {
            inner,
            installs_left: 1,
        };
        let mut engine = RemoteEngine::new(transport, &EngineConfig::default());
        peer.announce_port(57120);
        peer.announce_ready();
        engine.poll().unwrap();

        assert!(engine.install_template(&sine()));
        let mut instance = engine.request_instance(sine().id());
        engine.poll().unwrap();

        assert!(!engine.was_installed(sine().id()));
        assert!(matches!(
            instance.try_take(),
            Some(Err(EngineError::InstallFailed(template))) if &template == sine().id()
        ));
        assert_eq!(engine.pending_requests(), 0);
        assert!(peer.drain().is_empty());

        // the next creation tries the install again
        assert!(engine.install_template(&sine()));
        let mut instance = engine.request_instance(sine().id());
        engine.poll().unwrap();
        assert!(matches!(
            peer.drain().as_slice(),
            [
                EngineRequest::InstallTemplate { .. },
                EngineRequest::CreateInstance { request: 1, .. },
            ]
        ));
        peer.reply_instance(1, RemoteId(1000));
        engine.poll().unwrap();
        assert_eq!(instance.try_take().unwrap().unwrap(), RemoteId(1000));
    }
}
