use crossbeam_channel::{Receiver, Sender};

use super::EngineRequest;

/// FIFO of requests waiting to be sent to the remote engine.
///
/// Other parts of the session (the canvas, on module removal) enqueue
/// through cloned [`Sender`]s; the engine pops on every poll. A request the
/// transport could not take yet is held and popped again first.
#[derive(Debug)]
pub(crate) struct RequestQueue {
    tx: Sender<EngineRequest>,
    rx: Receiver<EngineRequest>,
    held: Option<EngineRequest>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx, held: None }
    }
}

impl RequestQueue {
    pub fn sender(&self) -> Sender<EngineRequest> {
        self.tx.clone()
    }

    pub fn push(&self, request: EngineRequest) {
        // both ends live in `self`, so the channel cannot be disconnected
        let _ = self.tx.send(request);
    }

    pub fn pop(&mut self) -> Option<EngineRequest> {
        self.held.take().or_else(|| self.rx.try_recv().ok())
    }

    /// Puts a request back at the front of the queue.
    pub fn hold(&mut self, request: EngineRequest) {
        debug_assert!(self.held.is_none());
        self.held = Some(request);
    }

    pub fn len(&self) -> usize {
        self.rx.len() + usize::from(self.held.is_some())
    }

    pub fn clear(&mut self) {
        self.held = None;
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::RemoteId;

    #[test]
    fn test_held_request_comes_first() {
        let mut queue = RequestQueue::default();
        queue.push(EngineRequest::SetDebug(true));
        queue
            .sender()
            .send(EngineRequest::FreeInstance {
                remote_id: RemoteId(1),
            })
            .unwrap();

        let first = queue.pop().unwrap();
        queue.hold(first.clone());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(first));

        queue.clear();
        assert_eq!(queue.pop(), None);
    }
}
