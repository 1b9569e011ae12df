//! Turning a template id into a module on the canvas.
//!
//! Creation never blocks. Its outcome is delivered through an
//! [`Eventual`], which is already set for purely local modules and is
//! otherwise fulfilled while the remote engine is polled.

use std::sync::Arc;

use patchwire_graph::Error as GraphError;
use thiserror::Error;

use crate::{
    canvas::CanvasHandle,
    config::CreationPolicy,
    engine::{EngineRequest, RemoteEngine},
    factory::NativeInstance,
    module::{Module, ModuleId, ModuleState, PendingStage},
    registry::{Registry, RegistryError},
    template::{ModuleTemplate, TemplateId},
    util::Eventual,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Template {template} needs native library {library:?}, which is not registered")]
    UnknownLibrary { template: TemplateId, library: String },

    #[error("Library {library:?} did not create an instance of {class_name:?}")]
    FactoryInstantiation { library: String, class_name: String },

    #[error("Setting up module {module} failed: {message}")]
    FollowUp { module: ModuleId, message: String },

    #[error("Module {module} was removed before it was created")]
    Removed { module: ModuleId },

    #[error("The canvas was dropped before the module was created")]
    CanvasDropped,

    #[error("Failed to restore connection: {0}")]
    Connection(#[from] GraphError),
}

impl CreateError {
    /// Returns `true` if the native factory failed to produce an instance.
    pub fn is_factory_error(&self) -> bool {
        matches!(
            self,
            CreateError::UnknownLibrary { .. } | CreateError::FactoryInstantiation { .. }
        )
    }
}

pub type CreateResult = Result<ModuleId, CreateError>;

/// Creates modules from templates, coordinating the local instance with
/// the remote engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pipeline {
    policy: CreationPolicy,
}

impl Pipeline {
    pub fn new(policy: CreationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CreationPolicy {
        self.policy
    }

    /// Starts creating a module from the template `id` (`"collection/name"`).
    ///
    /// Failures to resolve the template or to instantiate its native class
    /// are delivered through the returned [`Eventual`], and leave the canvas
    /// untouched.
    pub fn create(
        &self,
        id: &str,
        registry: &Registry,
        engine: &mut RemoteEngine,
        canvas: &CanvasHandle,
    ) -> Eventual<CreateResult> {
        match self.try_create(id, registry, engine, canvas) {
            Ok(created) => created,
            Err(e) => {
                log::warn!("Failed to create module {id:?}: {e}");
                Eventual::ready(Err(e))
            }
        }
    }

    fn try_create(
        &self,
        id: &str,
        registry: &Registry,
        engine: &mut RemoteEngine,
        canvas: &CanvasHandle,
    ) -> Result<Eventual<CreateResult>, CreateError> {
        let template = registry.resolve(id)?;
        let mut module = prepare_module(&template, registry)?;

        if !template.has_remote_code() {
            return Ok(Eventual::ready(Ok(insert_ready(canvas, module))));
        }

        engine.install_template(&template);

        if !engine.is_ready() {
            log::warn!(
                "Remote engine is not ready yet, module {} will run without a remote instance",
                template.id()
            );
            return Ok(Eventual::ready(Ok(insert_ready(canvas, module))));
        }

        let reply = engine.request_instance(template.id());
        let teardown = engine.request_sender();
        let weak = canvas.downgrade();

        match self.policy {
            CreationPolicy::LocalFirst => {
                let id = insert_ready(canvas, module);
                reply.on_fulfill(move |reply| {
                    let remote_id = match reply {
                        Ok(remote_id) => remote_id,
                        Err(e) => {
                            log::warn!("Module {id} stays without a remote instance: {e}");
                            return;
                        }
                    };
                    match weak.upgrade() {
                        Some(canvas) => {
                            canvas.with_inner(|canvas| canvas.bind_remote(id, remote_id));
                        }
                        None => {
                            let _ = teardown.send(EngineRequest::FreeInstance { remote_id });
                        }
                    }
                });
                Ok(Eventual::ready(Ok(id)))
            }
            CreationPolicy::AwaitRemote => {
                module.advance(ModuleState::Pending(PendingStage::AwaitingRemoteInstance));
                let id = canvas.with_inner(|canvas| canvas.insert_module(module));

                let (created, promise) = Eventual::new();
                reply.on_fulfill(move |reply| {
                    let Some(canvas) = weak.upgrade() else {
                        if let Ok(remote_id) = reply {
                            let _ = teardown.send(EngineRequest::FreeInstance { remote_id });
                        }
                        let _ = promise.fulfill(Err(CreateError::CanvasDropped));
                        return;
                    };

                    let result = canvas.with_inner(|canvas| {
                        if !canvas.contains_module(id) {
                            if let Ok(remote_id) = reply {
                                canvas.bind_remote(id, remote_id);
                            }
                            return Err(CreateError::Removed { module: id });
                        }
                        match reply {
                            Ok(remote_id) => {
                                canvas.bind_remote(id, remote_id);
                            }
                            Err(e) => {
                                log::warn!("Module {id} will run without a remote instance: {e}");
                            }
                        }
                        canvas.mark_ready(id);
                        Ok(id)
                    });
                    let _ = promise.fulfill(result);
                });
                Ok(created)
            }
        }
    }
}

/// Builds the module with its native instance. Only a module with remote
/// code moves on to wait for the engine.
fn prepare_module(
    template: &Arc<ModuleTemplate>,
    registry: &Registry,
) -> Result<Module, CreateError> {
    let mut module = Module::new(template.clone());
    if let Some(instance) = instantiate_native(template, registry)? {
        module.attach_native(instance);
    }
    if template.has_remote_code() {
        module.advance(ModuleState::Pending(PendingStage::AwaitingRemoteInstall));
    }
    Ok(module)
}

fn instantiate_native(
    template: &ModuleTemplate,
    registry: &Registry,
) -> Result<Option<NativeInstance>, CreateError> {
    let Some(class) = template.native_class() else {
        return Ok(None);
    };

    let factory = registry
        .library(&class.library)
        .ok_or_else(|| CreateError::UnknownLibrary {
            template: template.id().clone(),
            library: class.library.clone(),
        })?;

    factory
        .instantiate(&class.class_name)
        .map(Some)
        .ok_or_else(|| CreateError::FactoryInstantiation {
            library: class.library.clone(),
            class_name: class.class_name.clone(),
        })
}

fn insert_ready(canvas: &CanvasHandle, mut module: Module) -> ModuleId {
    module.mark_ready();
    canvas.with_inner(|canvas| canvas.insert_module(module))
}
