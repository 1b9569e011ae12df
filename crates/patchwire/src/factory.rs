//! Native (library-backed) module instances.

use std::fmt::Debug;

use downcast_rs::{Downcast, impl_downcast};

use crate::module::RemoteId;

/// The local side of a module implemented by a native library.
pub trait NativeModule: Downcast + Send {
    /// Called once, right after the module becomes ready.
    fn on_init(&mut self) {}

    /// Called once the remote engine has created the matching instance.
    fn on_remote_bound(&mut self, remote_id: RemoteId) {
        let _ = remote_id;
    }
}

impl_downcast!(NativeModule);

type Destructor = Box<dyn FnOnce(Box<dyn NativeModule>) + Send>;

/// Placeholder left in a [`NativeInstance`] while it is being destroyed.
struct Released;

impl NativeModule for Released {}

/// An owned native module together with the callback that destroys it.
///
/// The module is never dropped directly: when the instance goes away, the
/// destructor receives the box and hands it back to the library that
/// created it. The destructor runs exactly once.
pub struct NativeInstance {
    module: Box<dyn NativeModule>,
    destructor: Option<Destructor>,
}

impl NativeInstance {
    pub fn new<F>(module: Box<dyn NativeModule>, destructor: F) -> Self
    where
        F: FnOnce(Box<dyn NativeModule>) + Send + 'static,
    {
        Self {
            module,
            destructor: Some(Box::new(destructor)),
        }
    }

    /// Wraps a module that can simply be dropped.
    pub fn owned(module: impl NativeModule) -> Self {
        Self {
            module: Box::new(module),
            destructor: None,
        }
    }

    pub fn module(&self) -> &dyn NativeModule {
        &*self.module
    }

    pub fn module_mut(&mut self) -> &mut dyn NativeModule {
        &mut *self.module
    }

    pub fn downcast_ref<T: NativeModule>(&self) -> Option<&T> {
        self.module.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: NativeModule>(&mut self) -> Option<&mut T> {
        self.module.downcast_mut::<T>()
    }
}

impl Drop for NativeInstance {
    fn drop(&mut self) {
        if let Some(destructor) = self.destructor.take() {
            let module = std::mem::replace(&mut self.module, Box::new(Released));
            log::debug!("Handing native module back to its library");
            destructor(module);
        }
    }
}

impl Debug for NativeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeInstance")
            .field("has_destructor", &self.destructor.is_some())
            .finish_non_exhaustive()
    }
}

/// Creates native modules by class name.
///
/// Returning `None` means the library has no usable instance for the class.
pub trait ModuleFactory: Send + Sync {
    fn instantiate(&self, class_name: &str) -> Option<NativeInstance>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&str) -> Option<NativeInstance> + Send + Sync,
{
    fn instantiate(&self, class_name: &str) -> Option<NativeInstance> {
        self(class_name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct Counter(u32);

    impl NativeModule for Counter {
        fn on_init(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_destructor_runs_once_with_module() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let seen = destroyed.clone();
        let mut instance = NativeInstance::new(Box::new(Counter(41)), move |module| {
            let counter = module.downcast::<Counter>().ok().unwrap();
            assert_eq!(counter.0, 42);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        instance.module_mut().on_init();
        assert_eq!(instance.downcast_ref::<Counter>().unwrap().0, 42);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        drop(instance);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_factory() {
        let factory = |class_name: &str| match class_name {
            "Counter" => Some(NativeInstance::owned(Counter(0))),
            _ => None,
        };

        assert!(factory.instantiate("Counter").is_some());
        assert!(factory.instantiate("Missing").is_none());
    }
}
