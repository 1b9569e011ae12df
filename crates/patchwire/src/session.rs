use std::{fmt::Display, sync::Arc};

use rustc_hash::FxHashMap;

use crate::{
    canvas::{Canvas, CanvasHandle},
    config::SessionConfig,
    engine::{EngineResult, RemoteEngine, Transport},
    module::{Module, ModuleId},
    pipeline::{CreateError, CreateResult, Pipeline},
    registry::Registry,
    snapshot::PatchSnapshot,
    util::{Eventual, join_all},
};

/// Maps the module keys of a restored [`PatchSnapshot`] to the new modules.
pub type RestoreResult = Result<FxHashMap<u64, ModuleId>, CreateError>;

/// Everything one open patch needs: its templates, the remote engine, and
/// the canvas.
///
/// All methods are meant to be called from one control thread, which also
/// calls [`poll()`](Session::poll) regularly. Creation results that depend
/// on the remote engine are delivered during a poll.
pub struct Session {
    config: SessionConfig,
    registry: Arc<Registry>,
    engine: RemoteEngine,
    pipeline: Pipeline,
    canvas: CanvasHandle,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        registry: Arc<Registry>,
        transport: impl Transport + 'static,
    ) -> Self {
        let engine = RemoteEngine::new(transport, &config.engine);
        let canvas = Canvas::with_teardown(engine.request_sender()).into_handle();
        Self {
            pipeline: Pipeline::new(config.creation_policy),
            config,
            registry,
            engine,
            canvas,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn engine(&self) -> &RemoteEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RemoteEngine {
        &mut self.engine
    }

    /// The shared canvas handle, for callers that need to keep it around.
    pub fn canvas(&self) -> &CanvasHandle {
        &self.canvas
    }

    /// Runs `f` with exclusive access to the canvas.
    pub fn with_canvas<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Canvas) -> R,
    {
        self.canvas.with_inner(f)
    }

    /// Starts creating a module from the template `id` (`"collection/name"`).
    pub fn create_module(&mut self, id: &str) -> Eventual<CreateResult> {
        self.pipeline
            .create(id, &self.registry, &mut self.engine, &self.canvas)
    }

    /// Creates a module and runs `follow_up` on it once it exists.
    ///
    /// The creation only counts as done when `follow_up` succeeds. If it
    /// fails, the module is removed again and the error is reported as
    /// [`CreateError::FollowUp`].
    pub fn create_module_with<F, E>(&mut self, id: &str, follow_up: F) -> Eventual<CreateResult>
    where
        F: FnOnce(ModuleId, &mut Module) -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let canvas = self.canvas.downgrade();
        self.create_module(id).then(move |created| {
            let id = created?;
            let canvas = canvas.upgrade().ok_or(CreateError::CanvasDropped)?;
            canvas.with_inner(|canvas| {
                let module = canvas
                    .module_mut(id)
                    .ok_or(CreateError::Removed { module: id })?;
                if let Err(e) = follow_up(id, module) {
                    log::warn!("Setting up module {id} failed, removing it: {e}");
                    canvas.remove_module(id);
                    return Err(CreateError::FollowUp {
                        module: id,
                        message: e.to_string(),
                    });
                }
                Ok(id)
            })
        })
    }

    /// Removes a module and all of its connections. Does nothing if the
    /// module is gone already.
    pub fn remove_module(&self, id: ModuleId) -> bool {
        self.canvas.with_inner(|canvas| canvas.remove_module(id))
    }

    /// Exchanges messages with the remote engine. See [`RemoteEngine::poll()`].
    ///
    /// If the engine stopped meanwhile, the modules keep running locally but
    /// lose their remote ids, which would name nothing in a restarted engine.
    pub fn poll(&mut self) -> EngineResult<usize> {
        let generation = self.engine.generation();
        let polled = self.engine.poll();
        if self.engine.generation() != generation {
            let forgotten = self.canvas.with_inner(|canvas| canvas.forget_remote_ids());
            log::info!("Remote engine stopped, {forgotten} module(s) lost their remote instance");
        }
        polled
    }

    pub fn snapshot(&self) -> PatchSnapshot {
        self.canvas.with_inner(|canvas| canvas.snapshot())
    }

    /// Recreates the modules of `snapshot`, then its connections.
    ///
    /// Completes once every module has been created. If any module or
    /// connection fails, the modules created for this restore are removed
    /// again and the first error is reported.
    pub fn restore(&mut self, snapshot: &PatchSnapshot) -> Eventual<RestoreResult> {
        let keys: Vec<u64> = snapshot.modules.iter().map(|record| record.key).collect();
        let creations: Vec<_> = snapshot
            .modules
            .iter()
            .map(|record| self.create_module(&record.template))
            .collect();

        let canvas = self.canvas.downgrade();
        let snapshot = snapshot.clone();
        join_all(creations).then(move |results| {
            let canvas = canvas.upgrade().ok_or(CreateError::CanvasDropped)?;
            canvas.with_inner(|canvas| {
                let mut ids = FxHashMap::default();
                let mut failure = None;
                for (key, result) in keys.into_iter().zip(results) {
                    match result {
                        Ok(id) => {
                            ids.insert(key, id);
                        }
                        Err(e) => {
                            failure.get_or_insert(e);
                        }
                    }
                }

                if failure.is_none() {
                    failure = canvas.replay(&snapshot, &ids).err().map(CreateError::from);
                }

                match failure {
                    Some(e) => {
                        log::warn!("Restoring patch failed, rolling back: {e}");
                        for id in ids.values() {
                            canvas.remove_module(*id);
                        }
                        Err(e)
                    }
                    None => Ok(ids),
                }
            })
        })
    }

    /// Removes every module, sends the resulting teardown requests, and
    /// forgets all remote state.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        let removed = self.canvas.with_inner(|canvas| canvas.clear());
        log::info!("Shutting down session, removed {removed} module(s)");
        let flushed = self.engine.flush();
        self.engine.reset();
        flushed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("modules", &self.canvas.node_count())
            .finish_non_exhaustive()
    }
}
