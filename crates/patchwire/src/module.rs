//! Placed module instances and their lifecycle.

use std::{fmt::Display, sync::Arc};

use patchwire_graph::{NodeId, node::AbstractNode};

use crate::{factory::NativeInstance, template::ModuleTemplate};

/// Identity of a module placed on a [`Canvas`](crate::canvas::Canvas).
pub type ModuleId = NodeId;

/// Id of the matching instance inside the remote engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RemoteId(pub i32);

impl Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingStage {
    AwaitingFactory,
    AwaitingRemoteInstall,
    AwaitingRemoteInstance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Pending(PendingStage),
    Ready,
    Removed,
}

impl ModuleState {
    fn rank(self) -> u8 {
        match self {
            ModuleState::Pending(PendingStage::AwaitingFactory) => 0,
            ModuleState::Pending(PendingStage::AwaitingRemoteInstall) => 1,
            ModuleState::Pending(PendingStage::AwaitingRemoteInstance) => 2,
            ModuleState::Ready => 3,
            ModuleState::Removed => 4,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, ModuleState::Pending(_))
    }
}

/// The local object backing a module.
#[derive(Debug, Default)]
pub enum LocalHandle {
    /// A plain value; the module has no native implementation.
    #[default]
    Value,
    Native(NativeInstance),
}

/// One module placed on the canvas.
#[derive(Debug)]
pub struct Module {
    template: Arc<ModuleTemplate>,
    handle: LocalHandle,
    remote_id: Option<RemoteId>,
    state: ModuleState,
    initialized: bool,
}

impl Module {
    pub fn new(template: Arc<ModuleTemplate>) -> Self {
        Self {
            template,
            handle: LocalHandle::Value,
            remote_id: None,
            state: ModuleState::Pending(PendingStage::AwaitingFactory),
            initialized: false,
        }
    }

    pub(crate) fn attach_native(&mut self, instance: NativeInstance) {
        self.handle = LocalHandle::Native(instance);
    }

    #[inline]
    pub fn template(&self) -> &Arc<ModuleTemplate> {
        &self.template
    }

    #[inline]
    pub fn handle(&self) -> &LocalHandle {
        &self.handle
    }

    pub fn native(&self) -> Option<&NativeInstance> {
        match &self.handle {
            LocalHandle::Native(instance) => Some(instance),
            LocalHandle::Value => None,
        }
    }

    pub fn native_mut(&mut self) -> Option<&mut NativeInstance> {
        match &mut self.handle {
            LocalHandle::Native(instance) => Some(instance),
            LocalHandle::Value => None,
        }
    }

    #[inline]
    pub fn remote_id(&self) -> Option<RemoteId> {
        self.remote_id
    }

    #[inline]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == ModuleState::Ready
    }

    /// Moves the module forward to `next`.
    ///
    /// Repeating the current state or going backwards does nothing; returns
    /// whether the state changed.
    pub fn advance(&mut self, next: ModuleState) -> bool {
        if next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }

    /// Marks the module ready and runs its post-construction hook once.
    pub fn mark_ready(&mut self) -> bool {
        if !self.advance(ModuleState::Ready) {
            return false;
        }
        if !self.initialized {
            self.initialized = true;
            if let Some(instance) = self.native_mut() {
                instance.module_mut().on_init();
            }
        }
        true
    }

    /// Records the remote instance id. Only the first id is kept.
    pub fn bind_remote(&mut self, remote_id: RemoteId) -> bool {
        if self.remote_id.is_some() || self.state == ModuleState::Removed {
            return false;
        }
        self.remote_id = Some(remote_id);
        if let Some(instance) = self.native_mut() {
            instance.module_mut().on_remote_bound(remote_id);
        }
        true
    }

    /// Drops the remote id after the engine lost its instances, so a later
    /// one can be bound. Returns whether there was one.
    pub fn forget_remote(&mut self) -> bool {
        self.remote_id.take().is_some()
    }
}

impl AbstractNode for Module {
    fn name(&self) -> Option<String> {
        Some(self.template.id().to_string())
    }

    fn is_connectable(&self) -> bool {
        self.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::NativeModule;

    #[derive(Default)]
    struct Probe {
        inits: u32,
        bound: Vec<RemoteId>,
    }

    impl NativeModule for Probe {
        fn on_init(&mut self) {
            self.inits += 1;
        }

        fn on_remote_bound(&mut self, remote_id: RemoteId) {
            self.bound.push(remote_id);
        }
    }

    fn module() -> Module {
        let mut module = Module::new(Arc::new(ModuleTemplate::new("gen", "sine")));
        module.attach_native(NativeInstance::owned(Probe::default()));
        module
    }

    fn probe(module: &Module) -> &Probe {
        module.native().unwrap().downcast_ref::<Probe>().unwrap()
    }

    #[test]
    fn test_state_only_moves_forward() {
        let mut module = module();
        assert!(!module.is_connectable());
        assert!(module.advance(ModuleState::Pending(PendingStage::AwaitingRemoteInstance)));
        assert!(!module.advance(ModuleState::Pending(PendingStage::AwaitingRemoteInstall)));
        assert!(module.mark_ready());
        assert!(!module.mark_ready());
        assert!(module.is_connectable());
        assert!(module.advance(ModuleState::Removed));
        assert!(!module.advance(ModuleState::Ready));
        assert!(!module.is_connectable());
    }

    #[test]
    fn test_init_hook_runs_once() {
        let mut module = module();
        module.mark_ready();
        module.mark_ready();
        assert_eq!(probe(&module).inits, 1);
    }

    #[test]
    fn test_remote_id_binds_once() {
        let mut module = module();
        assert!(module.bind_remote(RemoteId(3)));
        assert!(!module.bind_remote(RemoteId(4)));
        assert_eq!(module.remote_id(), Some(RemoteId(3)));
        assert_eq!(probe(&module).bound, [RemoteId(3)]);
    }

    #[test]
    fn test_forgotten_remote_id_rebinds() {
        let mut module = module();
        assert!(!module.forget_remote());
        module.bind_remote(RemoteId(3));
        assert!(module.forget_remote());
        assert_eq!(module.remote_id(), None);
        assert!(module.bind_remote(RemoteId(5)));
        assert_eq!(probe(&module).bound, [RemoteId(3), RemoteId(5)]);
    }
}
