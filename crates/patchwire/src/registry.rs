//! Lookup of module templates by `collection/name`.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    factory::ModuleFactory,
    template::{ModuleTemplate, TemplateId},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Malformed template id {0:?}, expected \"collection/name\"")]
    MalformedId(String),

    #[error("Unknown collection {0:?}")]
    UnknownCollection(String),

    #[error("Unknown template {name:?} in collection {collection:?}")]
    UnknownTemplate { collection: String, name: String },

    #[error("Template {0} is already registered")]
    DuplicateTemplate(TemplateId),
}

/// A named group of templates, shown as one menu in a module selector.
#[derive(Debug, Clone)]
pub struct Collection {
    id: String,
    name: String,
    templates: BTreeMap<String, Arc<ModuleTemplate>>,
}

impl Collection {
    fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            templates: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Iterates over the templates in name order.
    pub fn templates(&self) -> impl Iterator<Item = &Arc<ModuleTemplate>> {
        self.templates.values()
    }
}

/// Holds every known template and native library.
///
/// The registry is filled once at startup and then shared read-only
/// (usually behind an [`Arc`]), so lookups need no locking.
#[derive(Default)]
pub struct Registry {
    collections: BTreeMap<String, Collection>,
    libraries: FxHashMap<String, Arc<dyn ModuleFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty collection, or renames an existing one.
    pub fn add_collection(&mut self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        let name = name.into();
        self.collections
            .entry(id.clone())
            .and_modify(|collection| collection.name.clone_from(&name))
            .or_insert_with(|| Collection::new(id, name));
    }

    /// Registers a template, creating its collection if needed.
    pub fn register(&mut self, template: ModuleTemplate) -> Result<(), RegistryError> {
        let id = template.id().clone();
        let collection = self
            .collections
            .entry(id.collection.clone())
            .or_insert_with(|| Collection::new(id.collection.clone(), id.collection.clone()));

        if collection.templates.contains_key(&id.name) {
            return Err(RegistryError::DuplicateTemplate(id));
        }

        log::debug!("Registered template {id}");
        collection.templates.insert(id.name, Arc::new(template));
        Ok(())
    }

    /// Registers the factory that instantiates native classes of `library`.
    ///
    /// A library registered twice keeps the latest factory.
    pub fn register_library(&mut self, name: impl Into<String>, factory: Arc<dyn ModuleFactory>) {
        let name = name.into();
        if self.libraries.insert(name.clone(), factory).is_some() {
            log::warn!("Replaced native library {name:?}");
        }
    }

    pub fn library(&self, name: &str) -> Option<&Arc<dyn ModuleFactory>> {
        self.libraries.get(name)
    }

    /// Looks up a template by its `"collection/name"` string.
    pub fn resolve(&self, id: &str) -> Result<Arc<ModuleTemplate>, RegistryError> {
        self.get(&TemplateId::parse(id)?)
    }

    pub fn get(&self, id: &TemplateId) -> Result<Arc<ModuleTemplate>, RegistryError> {
        let collection = self
            .collections
            .get(&id.collection)
            .ok_or_else(|| RegistryError::UnknownCollection(id.collection.clone()))?;
        collection
            .templates
            .get(&id.name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTemplate {
                collection: id.collection.clone(),
                name: id.name.clone(),
            })
    }

    /// Iterates over the collections in id order.
    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn collection(&self, id: &str) -> Option<&Collection> {
        self.collections.get(id)
    }

    pub fn templates_in(
        &self,
        collection: &str,
    ) -> Result<impl Iterator<Item = &Arc<ModuleTemplate>>, RegistryError> {
        self.collection(collection)
            .map(Collection::templates)
            .ok_or_else(|| RegistryError::UnknownCollection(collection.to_string()))
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut libraries: Vec<_> = self.libraries.keys().collect();
        libraries.sort();
        f.debug_struct("Registry")
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .field("libraries", &libraries)
            .finish()
    }
}
