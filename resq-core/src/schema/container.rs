use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use tracing::trace;

use crate::path::PropertyPath;
use crate::schema::handler::PropertyHandler;

/// Index of a container in the schema arena
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub(crate) usize);

impl ContainerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ContainerRole {
    /// Top level resource; references point to resources only
    Resource { persistent: bool },
    /// Embedded object, stored inside its owner
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerShape {
    Plain,
    /// Base of a polymorphic object: the discriminator property and the variant containers by tag
    Polymorphic {
        discriminator: String,
        variants: BTreeMap<String, ContainerId>,
    },
    /// One variant of a polymorphic object
    Concrete { tag: String, base: ContainerId },
}

/// Property handlers of one resource type, embedded object type or polymorphic variant.
pub struct PropertiesContainer {
    id: ContainerId,
    name: String,
    role: ContainerRole,
    shape: ContainerShape,
    handlers: Vec<Arc<PropertyHandler>>,
    index: HashMap<String, usize>,
    id_index: Option<usize>,
    discriminator_index: Option<usize>,
    path_cache: scc::HashMap<String, Arc<PropertyPath>>,
}

impl PropertiesContainer {
    pub(crate) fn new(id: ContainerId, name: String, role: ContainerRole, shape: ContainerShape) -> Self {
        PropertiesContainer {
            id,
            name,
            role,
            shape,
            handlers: Vec::new(),
            index: HashMap::new(),
            id_index: None,
            discriminator_index: None,
            path_cache: scc::HashMap::new(),
        }
    }

    /// Add a handler; returns false if a handler of the same name is already present.
    pub(crate) fn add_handler(&mut self, handler: Arc<PropertyHandler>) -> bool {
        if self.index.contains_key(handler.name()) {
            return false;
        }
        let position = self.handlers.len();
        if handler.is_id() {
            self.id_index = Some(position);
        }
        if handler.is_type() {
            self.discriminator_index = Some(position);
        }
        self.index.insert(handler.name().to_owned(), position);
        self.handlers.push(handler);
        true
    }

    /// Put inherited handlers in front of the own ones.
    /// Returns the name of the first own handler hiding an inherited one.
    pub(crate) fn inherit(&mut self, inherited: Vec<Arc<PropertyHandler>>) -> Result<(), String> {
        let own = std::mem::take(&mut self.handlers);
        self.index.clear();
        self.id_index = None;
        self.discriminator_index = None;
        for handler in inherited.into_iter().chain(own) {
            let name = handler.name().to_owned();
            if !self.add_handler(handler) {
                return Err(name);
            }
        }
        Ok(())
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &ContainerRole {
        &self.role
    }

    pub fn shape(&self) -> &ContainerShape {
        &self.shape
    }

    pub fn is_resource(&self) -> bool {
        matches!(self.role, ContainerRole::Resource { .. })
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.role, ContainerRole::Resource { persistent: true })
    }

    /// Properties of the container are stored by the backend: persistent resources
    /// and embedded objects
    pub fn holds_persistent_data(&self) -> bool {
        match self.role {
            ContainerRole::Resource { persistent } => persistent,
            ContainerRole::Object => true,
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(self.shape, ContainerShape::Polymorphic { .. })
    }

    pub fn is_concrete_variant(&self) -> bool {
        matches!(self.shape, ContainerShape::Concrete { .. })
    }

    /// Handlers in declaration order; variants list the inherited handlers first
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<PropertyHandler>> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler(&self, name: &str) -> Option<&Arc<PropertyHandler>> {
        self.index.get(name).map(|i| &self.handlers[*i])
    }

    pub fn id_handler(&self) -> Option<&Arc<PropertyHandler>> {
        self.id_index.map(|i| &self.handlers[i])
    }

    pub fn discriminator(&self) -> Option<&Arc<PropertyHandler>> {
        self.discriminator_index.map(|i| &self.handlers[i])
    }

    pub fn simple_handlers(&self) -> impl Iterator<Item = &Arc<PropertyHandler>> {
        self.handlers.iter().filter(|h| h.is_simple())
    }

    pub fn object_handlers(&self) -> impl Iterator<Item = &Arc<PropertyHandler>> {
        self.handlers.iter().filter(|h| h.is_object())
    }

    pub fn reference_handlers(&self) -> impl Iterator<Item = &Arc<PropertyHandler>> {
        self.handlers.iter().filter(|h| h.is_reference())
    }

    pub fn aggregate_handlers(&self) -> impl Iterator<Item = &Arc<PropertyHandler>> {
        self.handlers.iter().filter(|h| h.is_aggregate())
    }

    /// Variant container selected by a type tag (polymorphic base only)
    pub fn variant(&self, tag: &str) -> Option<ContainerId> {
        match &self.shape {
            ContainerShape::Polymorphic { variants, .. } => variants.get(tag).copied(),
            _ => None,
        }
    }

    pub fn variant_tags(&self) -> Vec<&str> {
        match &self.shape {
            ContainerShape::Polymorphic { variants, .. } => {
                variants.keys().map(|k| k.as_str()).collect()
            }
            _ => vec![],
        }
    }

    /// Tag of a concrete variant
    pub fn variant_tag(&self) -> Option<&str> {
        match &self.shape {
            ContainerShape::Concrete { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn base(&self) -> Option<ContainerId> {
        match &self.shape {
            ContainerShape::Concrete { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub(crate) fn cached_path(&self, path: &str) -> Option<Arc<PropertyPath>> {
        let hit = self.path_cache.read_sync(path, |_, p| p.clone());
        trace!(container = %self.name, path, hit = hit.is_some(), "path cache lookup");
        hit
    }

    /// Insert a resolved path unless a concurrent resolution got there first.
    /// Returns the cached entry.
    pub(crate) fn cache_path(&self, path: &str, resolved: Arc<PropertyPath>) -> Arc<PropertyPath> {
        let entry = self
            .path_cache
            .entry_sync(path.to_owned())
            .or_insert(resolved);
        entry.get().clone()
    }

    pub fn cached_paths(&self) -> usize {
        self.path_cache.len()
    }
}

impl Debug for PropertiesContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertiesContainer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("shape", &self.shape)
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
