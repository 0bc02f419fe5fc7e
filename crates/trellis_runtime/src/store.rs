//! The declaration graph.
//!
//! References are handed out before anything is known about them. A thunk
//! is declared per reference and invoked at most once, the first time the
//! reference is resolved. Thunks may create and capture references freely,
//! including their own, which is how self-referential and mutually
//! recursive types are expressed. Only reading a configuration requires
//! resolution, and a configuration cannot be read while it is still being
//! produced. A thunk that needs the configuration of a reference still in
//! progress, including one further up its own resolution, registers a
//! callback with [`ConfigStore::on_resolved`] instead.

use crate::config::{Config, FieldConfig, TypeConfig};
use crate::extension::Pipeline;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use trellis_core::{BuildError, BuildResult, RefKind, Reference};

static NEXT_BUILD_ID: AtomicU64 = AtomicU64::new(0);

/// Deferred factory for a reference's configuration.
pub type Thunk = Box<dyn FnOnce(&ConfigStore) -> BuildResult<Config>>;

/// Callback waiting for a reference's configuration.
pub type Deferred = Box<dyn FnOnce(&ConfigStore, &Config) -> BuildResult<()>>;

#[derive(Debug)]
struct Slot {
    name: String,
    parent: Option<Reference>,
}

/// Arena of references plus their thunks and resolved configurations.
///
/// The store is a build-time object. Interior mutability lets thunks and
/// extension hooks, which only see `&ConfigStore`, declare and resolve
/// further references.
pub struct ConfigStore {
    id: u64,
    pipeline: Pipeline,
    slots: RefCell<Vec<Slot>>,
    names: RefCell<FxHashMap<String, Reference>>,
    fields: RefCell<FxHashMap<Reference, IndexMap<String, Reference>>>,
    thunks: RefCell<FxHashMap<Reference, Thunk>>,
    order: RefCell<Vec<Reference>>,
    resolving: RefCell<FxHashSet<Reference>>,
    resolved: RefCell<FxHashMap<Reference, Arc<Config>>>,
    deferred: RefCell<FxHashMap<Reference, Vec<Deferred>>>,
}

impl ConfigStore {
    /// Creates an empty store whose configurations pass through `pipeline`.
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            id: NEXT_BUILD_ID.fetch_add(1, Ordering::Relaxed),
            pipeline,
            slots: RefCell::default(),
            names: RefCell::default(),
            fields: RefCell::default(),
            thunks: RefCell::default(),
            order: RefCell::default(),
            resolving: RefCell::default(),
            resolved: RefCell::default(),
            deferred: RefCell::default(),
        }
    }

    /// Returns an id unique to this store, and so to one build.
    pub fn build_id(&self) -> u64 {
        self.id
    }

    /// Returns the extension pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Creates a reference to a type.
    pub fn create_ref(&self, kind: RefKind, name: impl Into<String>) -> BuildResult<Reference> {
        self.push_slot(kind, name.into(), None)
    }

    /// Creates a reference to a field of `parent`.
    pub fn create_field_ref(&self, parent: Reference, name: impl Into<String>) -> BuildResult<Reference> {
        self.push_slot(RefKind::Field, name.into(), Some(parent))
    }

    fn push_slot(&self, kind: RefKind, name: String, parent: Option<Reference>) -> BuildResult<Reference> {
        let mut slots = self.slots.borrow_mut();
        let index = slot_index(slots.len(), &name)?;
        slots.push(Slot { name, parent });
        Ok(Reference::from_raw(index, kind))
    }

    /// Registers the thunk for `reference`.
    pub fn declare<F>(&self, reference: Reference, thunk: F) -> BuildResult<()>
    where
        F: FnOnce(&ConfigStore) -> BuildResult<Config> + 'static,
    {
        let name = self.name_of(reference);
        if self.is_declared(reference) {
            return Err(BuildError::DuplicateDeclaration { name });
        }

        match self.parent_of(reference) {
            Some(parent) => {
                let mut fields = self.fields.borrow_mut();
                let siblings = fields.entry(parent).or_default();
                if siblings.contains_key(&name) {
                    return Err(BuildError::DuplicateName {
                        name: format!("{}.{}", self.name_of(parent), name),
                    });
                }
                siblings.insert(name, reference);
            }
            None => {
                let mut names = self.names.borrow_mut();
                if names.contains_key(&name) {
                    return Err(BuildError::DuplicateName { name });
                }
                names.insert(name, reference);
            }
        }

        self.thunks.borrow_mut().insert(reference, Box::new(thunk));
        self.order.borrow_mut().push(reference);
        Ok(())
    }

    /// Returns whether `reference` has been declared.
    pub fn is_declared(&self, reference: Reference) -> bool {
        self.thunks.borrow().contains_key(&reference)
            || self.resolving.borrow().contains(&reference)
            || self.resolved.borrow().contains_key(&reference)
    }

    /// Returns the configuration of `reference`, running its thunk on first
    /// use.
    pub fn resolve(&self, reference: Reference) -> BuildResult<Arc<Config>> {
        if let Some(config) = self.resolved.borrow().get(&reference) {
            return Ok(Arc::clone(config));
        }
        if self.resolving.borrow().contains(&reference) {
            return Err(BuildError::CircularResolution {
                name: self.display_name(reference),
            });
        }
        let Some(thunk) = self.thunks.borrow_mut().remove(&reference) else {
            return Err(BuildError::UnknownReference {
                name: self.display_name(reference),
            });
        };

        self.resolving.borrow_mut().insert(reference);
        let result = thunk(self).and_then(|config| self.finalize(reference, config));
        self.resolving.borrow_mut().remove(&reference);

        let config = Arc::new(result?);
        self.resolved
            .borrow_mut()
            .insert(reference, Arc::clone(&config));
        debug!(name = %self.display_name(reference), kind = %reference.kind(), "resolved reference");
        self.run_deferred(reference, &config)?;
        Ok(config)
    }

    /// Runs `callback` with the configuration of `reference` once it is
    /// populated.
    ///
    /// Runs immediately when the reference is already resolved. Otherwise
    /// the callback is queued and runs right after the reference resolves,
    /// which [`resolve_all`](Self::resolve_all) guarantees before it
    /// returns. This is how two thunks read each other's configuration.
    pub fn on_resolved<F>(&self, reference: Reference, callback: F) -> BuildResult<()>
    where
        F: FnOnce(&ConfigStore, &Config) -> BuildResult<()> + 'static,
    {
        if let Some(config) = self.resolved(reference) {
            return callback(self, &config);
        }
        self.deferred
            .borrow_mut()
            .entry(reference)
            .or_default()
            .push(Box::new(callback));
        Ok(())
    }

    fn run_deferred(&self, reference: Reference, config: &Config) -> BuildResult<()> {
        let Some(callbacks) = self.deferred.borrow_mut().remove(&reference) else {
            return Ok(());
        };
        debug!(name = %self.display_name(reference), callbacks = callbacks.len(), "running deferred callbacks");
        for callback in callbacks {
            callback(self, config)?;
        }
        Ok(())
    }

    fn finalize(&self, reference: Reference, config: Config) -> BuildResult<Config> {
        let name = self.name_of(reference);
        if config.kind() != reference.kind() {
            return Err(BuildError::KindMismatch {
                name,
                expected: reference.kind(),
                found: config.kind(),
            });
        }
        if config.name() != name {
            return Err(BuildError::invalid(
                self.display_name(reference),
                format!("configuration is named `{}`", config.name()),
            ));
        }

        Ok(match config {
            Config::Type(ty) => Config::Type(self.pipeline.on_type_config(ty, self)?),
            Config::Field(FieldConfig::Output(field)) => {
                Config::Field(FieldConfig::Output(self.pipeline.on_output_field_config(field, self)?))
            }
            Config::Field(FieldConfig::Input(field)) => {
                Config::Field(FieldConfig::Input(self.pipeline.on_input_field_config(field, self)?))
            }
        })
    }

    /// Resolves every reference declared so far, in declaration order, then
    /// every reference a deferred callback is still waiting for.
    pub fn resolve_all(&self) -> BuildResult<()> {
        let snapshot = self.order.borrow().clone();
        for reference in snapshot {
            self.resolve(reference)?;
        }

        loop {
            let waiting = self.deferred.borrow().keys().next().copied();
            let Some(reference) = waiting else {
                return Ok(());
            };
            let config = self.resolve(reference)?;
            self.run_deferred(reference, &config)?;
        }
    }

    /// Checks that every declaration ran and every reference points at a
    /// declaration.
    pub fn finish(&self) -> BuildResult<()> {
        let order = self.order.borrow().clone();
        if let Some(dangling) = order
            .iter()
            .find(|reference| self.thunks.borrow().contains_key(*reference))
        {
            return Err(BuildError::DanglingDeclaration {
                name: self.display_name(*dangling),
            });
        }

        for reference in &order {
            let Some(config) = self.resolved(*reference) else {
                continue;
            };
            if let Some(unknown) = config
                .references()
                .into_iter()
                .find(|target| !self.is_declared(*target))
            {
                return Err(BuildError::UnknownReference {
                    name: self.display_name(unknown),
                });
            }
        }
        Ok(())
    }

    /// Returns the configuration of `reference` if it has already been
    /// resolved.
    pub fn resolved(&self, reference: Reference) -> Option<Arc<Config>> {
        self.resolved.borrow().get(&reference).cloned()
    }

    /// Finds a declared type by name.
    pub fn lookup(&self, name: &str) -> Option<Reference> {
        self.names.borrow().get(name).copied()
    }

    /// Resolves a declared type by name.
    pub fn type_config(&self, name: &str) -> BuildResult<Arc<Config>> {
        let reference = self
            .lookup(name)
            .ok_or_else(|| BuildError::UnknownReference { name: name.to_string() })?;
        self.resolve(reference)
    }

    /// Returns the name `reference` was created with.
    pub fn name_of(&self, reference: Reference) -> String {
        self.slots
            .borrow()
            .get(reference.index() as usize)
            .map(|slot| slot.name.clone())
            .unwrap_or_default()
    }

    /// Returns every reference name, indexed by reference index.
    pub fn reference_names(&self) -> Vec<String> {
        self.slots.borrow().iter().map(|slot| slot.name.clone()).collect()
    }

    /// Returns `Type.field` for field references and the plain name
    /// otherwise.
    pub fn display_name(&self, reference: Reference) -> String {
        match self.parent_of(reference) {
            Some(parent) => format!("{}.{}", self.name_of(parent), self.name_of(reference)),
            None => self.name_of(reference),
        }
    }

    /// Returns the owning type of a field reference.
    pub fn parent_of(&self, reference: Reference) -> Option<Reference> {
        self.slots
            .borrow()
            .get(reference.index() as usize)
            .and_then(|slot| slot.parent)
    }

    /// Returns the declared fields of `parent`, in declaration order.
    pub fn fields_of(&self, parent: Reference) -> Vec<Reference> {
        self.fields
            .borrow()
            .get(&parent)
            .map(|fields| fields.values().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the interfaces `reference` implements.
    pub fn interfaces_of(&self, reference: Reference) -> BuildResult<Vec<Reference>> {
        let config = self.resolve(reference)?;
        Ok(config.as_type().map(|ty| ty.interfaces.clone()).unwrap_or_default())
    }

    /// Returns every declared type reference, in declaration order.
    pub fn types(&self) -> Vec<Reference> {
        self.order
            .borrow()
            .iter()
            .copied()
            .filter(|reference| reference.kind().is_type())
            .collect()
    }

    /// Resolves a declared type and returns its configuration.
    pub fn resolve_type(&self, reference: Reference) -> BuildResult<TypeConfig> {
        let config = self.resolve(reference)?;
        config.as_type().cloned().ok_or_else(|| BuildError::KindMismatch {
            name: self.display_name(reference),
            expected: reference.kind(),
            found: config.kind(),
        })
    }
}

/// Index of the next slot. Indices are never reused, so running out is an
/// error rather than a collision.
fn slot_index(len: usize, name: &str) -> BuildResult<u32> {
    u32::try_from(len).map_err(|_| BuildError::invalid(name, "too many references in one schema"))
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("id", &self.id)
            .field("pipeline", &self.pipeline)
            .field("references", &self.slots.borrow().len())
            .field("pending", &self.thunks.borrow().len())
            .field("resolved", &self.resolved.borrow().len())
            .field("deferred", &self.deferred.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFieldConfig;
    use std::rc::Rc;
    use trellis_core::{Options, TypeRef};

    fn object(name: &str) -> BuildResult<Config> {
        Ok(Config::Type(TypeConfig::new(name, RefKind::Object)))
    }

    fn output_field(parent: Reference, parent_type: &str, name: &str, ty: Reference) -> Config {
        Config::Field(FieldConfig::Output(OutputFieldConfig {
            name: name.into(),
            parent,
            parent_type: parent_type.into(),
            ty: TypeRef::named(ty),
            args: IndexMap::new(),
            description: None,
            resolver: None,
            options: Options::new(),
        }))
    }

    #[test]
    fn test_resolve_is_memoized() {
        let store = ConfigStore::new(Pipeline::empty());
        let user = store.create_ref(RefKind::Object, "User").unwrap();
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        store
            .declare(user, move |_| {
                *counter.borrow_mut() += 1;
                object("User")
            })
            .unwrap();

        let first = store.resolve(user).unwrap();
        let second = store.resolve(user).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_self_reference_through_field() {
        let store = ConfigStore::new(Pipeline::empty());
        let user = store.create_ref(RefKind::Object, "User").unwrap();
        let friend = store.create_field_ref(user, "friend").unwrap();
        store.declare(user, |_| object("User")).unwrap();
        store
            .declare(friend, move |_| Ok(output_field(user, "User", "friend", user)))
            .unwrap();

        store.resolve_all().unwrap();
        store.finish().unwrap();
        assert_eq!(store.fields_of(user), vec![friend]);
    }

    #[test]
    fn test_thunk_can_resolve_forward_declaration() {
        let store = ConfigStore::new(Pipeline::empty());
        let a = store.create_ref(RefKind::Object, "A").unwrap();
        let b = store.create_ref(RefKind::Object, "B").unwrap();
        store
            .declare(a, move |store| {
                let b_config = store.resolve(b)?;
                let mut config = TypeConfig::new("A", RefKind::Object);
                config.description = Some(format!("after {}", b_config.name()));
                Ok(Config::Type(config))
            })
            .unwrap();
        store.declare(b, |_| object("B")).unwrap();

        store.resolve_all().unwrap();
        let a_config = store.resolve(a).unwrap();
        assert_eq!(
            a_config.as_type().and_then(|t| t.description.as_deref()),
            Some("after B")
        );
    }

    #[test]
    fn test_resolving_self_is_circular() {
        let store = ConfigStore::new(Pipeline::empty());
        let node = store.create_ref(RefKind::Object, "Node").unwrap();
        store
            .declare(node, move |store| {
                store.resolve(node)?;
                object("Node")
            })
            .unwrap();

        assert_eq!(
            store.resolve(node).unwrap_err(),
            BuildError::CircularResolution {
                name: "Node".into()
            }
        );
    }

    #[test]
    fn test_mutual_thunks_defer_reads() {
        let store = ConfigStore::new(Pipeline::empty());
        let a = store.create_ref(RefKind::Object, "A").unwrap();
        let b = store.create_ref(RefKind::Object, "B").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let from_a = Rc::clone(&seen);
        store
            .declare(a, move |store| {
                let b_config = store.resolve(b)?;
                from_a.borrow_mut().push(format!("A saw {}", b_config.name()));
                object("A")
            })
            .unwrap();
        let from_b = Rc::clone(&seen);
        store
            .declare(b, move |store| {
                // A is still in progress here.
                store.on_resolved(a, move |_, a_config| {
                    from_b.borrow_mut().push(format!("B saw {}", a_config.name()));
                    Ok(())
                })?;
                object("B")
            })
            .unwrap();

        store.resolve_all().unwrap();
        store.finish().unwrap();
        assert_eq!(*seen.borrow(), vec!["A saw B", "B saw A"]);
    }

    #[test]
    fn test_deferred_callbacks_drain_in_resolve_all() {
        let store = ConfigStore::new(Pipeline::empty());
        let query = store.create_ref(RefKind::Object, "Query").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let slot = Rc::clone(&seen);
        store
            .declare(query, move |store| {
                let late = store.create_ref(RefKind::Object, "Late")?;
                store.declare(late, |_| object("Late"))?;
                store.on_resolved(late, move |_, config| {
                    slot.borrow_mut().push(config.name().to_string());
                    Ok(())
                })?;
                object("Query")
            })
            .unwrap();

        store.resolve_all().unwrap();
        store.finish().unwrap();
        assert_eq!(*seen.borrow(), vec!["Late"]);

        let now = Rc::clone(&seen);
        store
            .on_resolved(query, move |_, config| {
                now.borrow_mut().push(config.name().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(*seen.borrow(), vec!["Late", "Query"]);

        let ghost = store.create_ref(RefKind::Object, "Ghost").unwrap();
        store.on_resolved(ghost, |_, _| Ok(())).unwrap();
        assert_eq!(
            store.resolve_all().unwrap_err(),
            BuildError::UnknownReference {
                name: "Ghost".into()
            }
        );
    }

    #[test]
    fn test_deferred_error_fails_resolution() {
        let store = ConfigStore::new(Pipeline::empty());
        let user = store.create_ref(RefKind::Object, "User").unwrap();
        store.declare(user, |_| object("User")).unwrap();
        store
            .on_resolved(user, move |store, _| {
                Err(BuildError::invalid(store.name_of(user), "rejected by callback"))
            })
            .unwrap();

        assert_eq!(store.resolve(user).unwrap_err().name(), "User");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_slot_index_overflow_is_an_error() {
        assert_eq!(slot_index(7, "User"), Ok(7));
        assert_eq!(
            slot_index(usize::MAX, "User").unwrap_err(),
            BuildError::invalid("User", "too many references in one schema")
        );
    }

    #[test]
    fn test_declaration_errors() {
        let store = ConfigStore::new(Pipeline::empty());
        let user = store.create_ref(RefKind::Object, "User").unwrap();
        store.declare(user, |_| object("User")).unwrap();
        assert_eq!(
            store.declare(user, |_| object("User")).unwrap_err(),
            BuildError::DuplicateDeclaration {
                name: "User".into()
            }
        );

        let other = store.create_ref(RefKind::Object, "User").unwrap();
        assert_eq!(
            store.declare(other, |_| object("User")).unwrap_err(),
            BuildError::DuplicateName {
                name: "User".into()
            }
        );

        let missing = store.create_ref(RefKind::Object, "Missing").unwrap();
        assert_eq!(
            store.resolve(missing).unwrap_err(),
            BuildError::UnknownReference {
                name: "Missing".into()
            }
        );
    }

    #[test]
    fn test_kind_mismatch() {
        let store = ConfigStore::new(Pipeline::empty());
        let node = store.create_ref(RefKind::Interface, "Node").unwrap();
        store.declare(node, |_| object("Node")).unwrap();

        assert_eq!(
            store.resolve(node).unwrap_err(),
            BuildError::KindMismatch {
                name: "Node".into(),
                expected: RefKind::Interface,
                found: RefKind::Object,
            }
        );
    }

    #[test]
    fn test_finish_reports_dangling_and_unknown() {
        let store = ConfigStore::new(Pipeline::empty());
        let query = store.create_ref(RefKind::Object, "Query").unwrap();
        store
            .declare(query, |store| {
                let late = store.create_ref(RefKind::Object, "Late")?;
                store.declare(late, |_| object("Late"))?;
                object("Query")
            })
            .unwrap();
        store.resolve_all().unwrap();
        assert_eq!(
            store.finish().unwrap_err(),
            BuildError::DanglingDeclaration {
                name: "Late".into()
            }
        );

        let store = ConfigStore::new(Pipeline::empty());
        let query = store.create_ref(RefKind::Object, "Query").unwrap();
        let ghost = store.create_ref(RefKind::Object, "Ghost").unwrap();
        let field = store.create_field_ref(query, "ghost").unwrap();
        store.declare(query, |_| object("Query")).unwrap();
        store
            .declare(field, move |_| Ok(output_field(query, "Query", "ghost", ghost)))
            .unwrap();
        store.resolve_all().unwrap();
        assert_eq!(
            store.finish().unwrap_err(),
            BuildError::UnknownReference {
                name: "Ghost".into()
            }
        );
    }

    #[test]
    fn test_duplicate_field_name() {
        let store = ConfigStore::new(Pipeline::empty());
        let query = store.create_ref(RefKind::Object, "Query").unwrap();
        let first = store.create_field_ref(query, "me").unwrap();
        let second = store.create_field_ref(query, "me").unwrap();
        store.declare(first, move |_| Ok(output_field(query, "Query", "me", query))).unwrap();

        assert_eq!(
            store
                .declare(second, move |_| Ok(output_field(query, "Query", "me", query)))
                .unwrap_err(),
            BuildError::DuplicateName {
                name: "Query.me".into()
            }
        );
        assert_eq!(store.display_name(first), "Query.me");
    }
}
