#![doc = include_str!("../README.md")]

pub mod canvas;
pub mod config;
pub mod engine;
pub mod factory;
pub mod module;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod template;
pub mod util;

/// Re-exports of commonly used types and traits from the crate.
pub mod prelude {
    pub use crate::{
        canvas::{Canvas, CanvasHandle, DataMode, Ioid, WeakCanvas},
        config::{ConfigError, CreationPolicy, EngineConfig, SessionConfig},
        engine::{
            EngineError, EngineEvent, EngineRequest, EngineResult, RemoteEngine, Transport,
            loopback::{LoopbackPeer, LoopbackTransport, loopback, loopback_unbound},
        },
        factory::{ModuleFactory, NativeInstance, NativeModule},
        module::{LocalHandle, Module, ModuleId, ModuleState, PendingStage, RemoteId},
        pipeline::{CreateError, CreateResult, Pipeline},
        registry::{Collection, Registry, RegistryError},
        session::{RestoreResult, Session},
        snapshot::PatchSnapshot,
        template::{ModuleTemplate, PortDescriptor, PortKind, TemplateId},
        util::{Eventual, Promise, join_all},
    };
    #[cfg(feature = "osc")]
    pub use crate::engine::osc::OscTransport;
    pub use patchwire_graph::{Error as GraphError, GraphResult};
}
