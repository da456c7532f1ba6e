use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_signals::map_ref;
use futures_signals::signal::{Mutable, Signal, SignalExt};

use crate::schema::{Schema, classify};
use crate::typedef::TypeDef;
use crate::value::{ErrorTree, Value};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

/// Per-key sequence stamp for validation requests. Only the latest stamp for
/// a key may publish its result; slower, older requests are discarded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FieldMeta {
    pub dirty: bool,
    pub touched: bool,
    pub validating: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    UnknownKey(String),
    NotOwnKey(String),
    ShapeMismatch {
        expected: &'static str,
        context: &'static str,
    },
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::UnknownKey(key) => write!(f, "unknown form key `{key}`"),
            FormError::NotOwnKey(key) => write!(
                f,
                "key `{key}` is a nested form; use the nested form's own entry point"
            ),
            FormError::ShapeMismatch { expected, context } => {
                write!(f, "{context} expects a {expected}")
            }
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

pub type BoxSignal<T> = Pin<Box<dyn Signal<Item = T> + Send>>;

pub(crate) struct FormInner {
    pub(crate) id: FormId,
    pub(crate) schema: Schema,
    pub(crate) own_keys: Vec<String>,
    pub(crate) nested_keys: Vec<String>,
    pub(crate) leaves: BTreeMap<String, TypeDef>,
    pub(crate) nested: BTreeMap<String, Form>,
    pub(crate) own_defaults: BTreeMap<String, Value>,
    pub(crate) own_state: Mutable<BTreeMap<String, Value>>,
    /// Failing own keys only; valid keys are absent.
    pub(crate) own_errors: Mutable<BTreeMap<String, ErrorTree>>,
    pub(crate) meta: Mutable<BTreeMap<String, FieldMeta>>,
    pub(crate) tickets: RwLock<BTreeMap<String, ValidationTicket>>,
    pub(crate) submitted: Mutable<Option<Value>>,
    pub(crate) submit_count: AtomicU32,
}

/// Composed reactive form unit. Cheap to clone; all clones share state.
/// Built in one pass from its schema, wired once, never rewired.
#[derive(Clone)]
pub struct Form {
    pub(crate) inner: Arc<FormInner>,
}

pub fn create_form(schema: Schema) -> Form {
    Form::new(schema)
}

impl Form {
    pub fn new(schema: Schema) -> Self {
        let classified = classify(&schema);
        Self {
            inner: Arc::new(FormInner {
                id: FormId::next(),
                schema,
                own_keys: classified.own_keys,
                nested_keys: classified.nested_keys,
                leaves: classified.leaves,
                nested: classified.forms,
                own_state: Mutable::new(classified.own_defaults.clone()),
                own_defaults: classified.own_defaults,
                own_errors: Mutable::new(BTreeMap::new()),
                meta: Mutable::new(BTreeMap::new()),
                tickets: RwLock::new(BTreeMap::new()),
                submitted: Mutable::new(None),
                submit_count: AtomicU32::new(0),
            }),
        }
    }

    pub fn form_id(&self) -> FormId {
        self.inner.id
    }

    // --- composed reads -------------------------------------------------

    /// Full value tree: `{ ...nested, ...own }`, own keys winning, always a
    /// fresh merge of the current containers.
    pub fn values(&self) -> Value {
        let mut entries: BTreeMap<String, Value> = self
            .inner
            .nested
            .iter()
            .map(|(key, child)| (key.clone(), child.values()))
            .collect();
        for (key, value) in self.inner.own_state.lock_ref().iter() {
            entries.insert(key.clone(), value.clone());
        }
        Value::Record(entries)
    }

    /// Full error tree. Nested keys are always present (possibly empty
    /// nodes); valid own keys are absent.
    pub fn errors(&self) -> ErrorTree {
        let mut entries: BTreeMap<String, ErrorTree> = self
            .inner
            .nested
            .iter()
            .map(|(key, child)| (key.clone(), child.errors()))
            .collect();
        for (key, tree) in self.inner.own_errors.lock_ref().iter() {
            entries.insert(key.clone(), tree.clone());
        }
        ErrorTree::Node(entries)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().is_valid()
    }

    /// Default value tree captured at construction.
    pub fn initial_values(&self) -> Value {
        let mut entries: BTreeMap<String, Value> = self
            .inner
            .nested
            .iter()
            .map(|(key, child)| (key.clone(), child.initial_values()))
            .collect();
        for (key, value) in &self.inner.own_defaults {
            entries.insert(key.clone(), value.clone());
        }
        Value::Record(entries)
    }

    // --- signals ---------------------------------------------------------

    /// Subscribable value tree: the own-state signal folded with every
    /// nested form's value signal. The dependency graph is fixed at
    /// construction; each call builds a fresh subscriber over it.
    pub fn values_signal(&self) -> BoxSignal<Value> {
        let mut signal = self
            .inner
            .own_state
            .signal_cloned()
            .map(Value::Record)
            .boxed();
        for (key, child) in &self.inner.nested {
            let key = key.clone();
            let child_signal = child.values_signal();
            signal = (map_ref! {
                let composed = signal,
                let nested = child_signal => {
                    let mut entries = composed.as_record().cloned().unwrap_or_default();
                    entries.entry(key.clone()).or_insert_with(|| nested.clone());
                    Value::Record(entries)
                }
            })
            .boxed();
        }
        signal
    }

    /// Subscribable error tree, composed like [`Form::values_signal`].
    pub fn errors_signal(&self) -> BoxSignal<ErrorTree> {
        let mut signal = self
            .inner
            .own_errors
            .signal_cloned()
            .map(ErrorTree::Node)
            .boxed();
        for (key, child) in &self.inner.nested {
            let key = key.clone();
            let child_signal = child.errors_signal();
            signal = (map_ref! {
                let composed = signal,
                let nested = child_signal => {
                    let mut entries = match composed {
                        ErrorTree::Node(entries) => entries.clone(),
                        _ => BTreeMap::new(),
                    };
                    entries.entry(key.clone()).or_insert_with(|| nested.clone());
                    ErrorTree::Node(entries)
                }
            })
            .boxed();
        }
        signal
    }

    pub fn is_valid_signal(&self) -> BoxSignal<bool> {
        self.errors_signal()
            .map(|tree| tree.is_valid())
            .dedupe()
            .boxed()
    }

    /// Latest valid submission, if any.
    pub fn submitted_signal(&self) -> BoxSignal<Option<Value>> {
        self.inner.submitted.signal_cloned().boxed()
    }

    // --- mutations --------------------------------------------------------

    /// Replaces exactly one own key's slot. Nested keys are rejected; push
    /// values into a nested form through [`Form::fill`] or the nested form
    /// itself.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> FormResult<()> {
        self.expect_own_key(key)?;
        let value = value.into();
        let dirty = Some(&value) != self.inner.own_defaults.get(key);
        self.inner.own_state.lock_mut().insert(key.to_owned(), value);
        self.update_meta(key, |meta| meta.dirty = dirty);
        Ok(())
    }

    /// Partial structural merge: own keys present in `data` are overwritten,
    /// nested sub-trees present are forwarded to that form's `fill`, and
    /// absent keys keep their current value at every depth.
    pub fn fill(&self, data: impl Into<Value>) -> FormResult<()> {
        let data = data.into();
        let Value::Record(entries) = data else {
            return Err(FormError::ShapeMismatch {
                expected: "record",
                context: "fill",
            });
        };
        for key in entries.keys() {
            if !self.inner.leaves.contains_key(key) && !self.inner.nested.contains_key(key) {
                return Err(FormError::UnknownKey(key.clone()));
            }
        }

        let mut own_updates = Vec::new();
        for (key, value) in entries {
            match self.inner.nested.get(&key) {
                Some(child) => child.fill(value)?,
                None => own_updates.push((key, value)),
            }
        }

        let dirty_updates: Vec<(String, bool)> = own_updates
            .iter()
            .map(|(key, value)| (key.clone(), Some(value) != self.inner.own_defaults.get(key)))
            .collect();
        {
            let mut own = self.inner.own_state.lock_mut();
            for (key, value) in own_updates {
                own.insert(key, value);
            }
        }
        for (key, dirty) in dirty_updates {
            self.update_meta(&key, |meta| meta.dirty = dirty);
        }
        Ok(())
    }

    /// Restores the captured default tree, clears errors and field metadata,
    /// and propagates to every nested form.
    pub fn reset(&self) -> FormResult<()> {
        self.inner.own_state.set(self.inner.own_defaults.clone());
        self.inner.own_errors.set(BTreeMap::new());
        self.inner.meta.set(BTreeMap::new());
        write_lock(&self.inner.tickets, "resetting form")?.clear();
        for child in self.inner.nested.values() {
            child.reset()?;
        }
        Ok(())
    }

    pub fn touch(&self, key: &str) -> FormResult<()> {
        self.expect_own_key(key)?;
        self.update_meta(key, |meta| meta.touched = true);
        Ok(())
    }

    /// Push-down error assignment: own-key leaves are applied locally,
    /// nested sub-trees are forwarded to that form's `set_errors`.
    pub fn set_errors(&self, tree: ErrorTree) -> FormResult<()> {
        let ErrorTree::Node(entries) = tree else {
            return Err(FormError::ShapeMismatch {
                expected: "node",
                context: "set_errors",
            });
        };
        for key in entries.keys() {
            if !self.inner.leaves.contains_key(key) && !self.inner.nested.contains_key(key) {
                return Err(FormError::UnknownKey(key.clone()));
            }
        }
        let mut own_updates = Vec::new();
        for (key, tree) in entries {
            match self.inner.nested.get(&key) {
                Some(child) => child.set_errors(tree)?,
                None => own_updates.push((key, tree)),
            }
        }
        let mut own = self.inner.own_errors.lock_mut();
        for (key, tree) in own_updates {
            if tree.is_valid() {
                own.remove(&key);
            } else {
                own.insert(key, tree);
            }
        }
        Ok(())
    }

    /// Samples the current value tree gated by current validity: a valid
    /// form emits on `submitted` and returns the snapshot, an invalid one
    /// silently produces nothing. Callers surface errors via `validate`.
    pub fn submit(&self) -> Option<Value> {
        self.inner.submit_count.fetch_add(1, Ordering::SeqCst);
        if !self.is_valid() {
            return None;
        }
        let snapshot = self.values();
        self.inner.submitted.set(Some(snapshot.clone()));
        Some(snapshot)
    }

    // --- field accessors ---------------------------------------------------

    /// Per-key accessor: own keys get a bound handle, nested keys hand back
    /// the sub-form itself so its own units are reused rather than wrapped.
    pub fn field(&self, key: &str) -> FormResult<FieldRef> {
        if let Some(child) = self.inner.nested.get(key) {
            return Ok(FieldRef::Nested(child.clone()));
        }
        if self.inner.leaves.contains_key(key) {
            return Ok(FieldRef::Own(FieldHandle {
                form: self.clone(),
                key: key.to_owned(),
            }));
        }
        Err(FormError::UnknownKey(key.to_owned()))
    }

    pub fn field_meta(&self, key: &str) -> Option<FieldMeta> {
        self.inner.meta.lock_ref().get(key).copied()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.meta.lock_ref().values().any(|meta| meta.dirty)
            || self.inner.nested.values().any(Form::is_dirty)
    }

    /// First error message for a field, surfaced only once the field has
    /// been touched or the form has been submitted at least once.
    pub fn field_error_for_display(&self, key: &str) -> FormResult<Option<Arc<str>>> {
        self.expect_own_key(key)?;
        let touched = self
            .inner
            .meta
            .lock_ref()
            .get(key)
            .is_some_and(|meta| meta.touched);
        if !touched && self.inner.submit_count.load(Ordering::SeqCst) == 0 {
            return Ok(None);
        }
        Ok(self
            .inner
            .own_errors
            .lock_ref()
            .get(key)
            .and_then(first_message))
    }

    // --- introspection ------------------------------------------------------

    /// The schema as declared, raw nested schemas included.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn own_keys(&self) -> &[String] {
        &self.inner.own_keys
    }

    pub fn nested_keys(&self) -> &[String] {
        &self.inner.nested_keys
    }

    /// Resolved leaf definition for an own key.
    pub fn leaf(&self, key: &str) -> Option<&TypeDef> {
        self.inner.leaves.get(key)
    }

    /// Resolved sub-form for a nested key (raw nested schemas have been
    /// replaced by constructed forms).
    pub fn nested(&self, key: &str) -> Option<&Form> {
        self.inner.nested.get(key)
    }

    // --- internals -----------------------------------------------------------

    pub(crate) fn expect_own_key(&self, key: &str) -> FormResult<()> {
        if self.inner.leaves.contains_key(key) {
            Ok(())
        } else if self.inner.nested.contains_key(key) {
            Err(FormError::NotOwnKey(key.to_owned()))
        } else {
            Err(FormError::UnknownKey(key.to_owned()))
        }
    }

    pub(crate) fn update_meta(&self, key: &str, update: impl FnOnce(&mut FieldMeta)) {
        let mut meta = self.inner.meta.lock_mut();
        update(meta.entry(key.to_owned()).or_default());
    }
}

#[derive(Clone)]
pub enum FieldRef {
    Own(FieldHandle),
    Nested(Form),
}

impl FieldRef {
    pub fn into_own(self) -> Option<FieldHandle> {
        match self {
            FieldRef::Own(handle) => Some(handle),
            FieldRef::Nested(_) => None,
        }
    }

    pub fn into_nested(self) -> Option<Form> {
        match self {
            FieldRef::Own(_) => None,
            FieldRef::Nested(form) => Some(form),
        }
    }
}

/// Accessor bound to one own key: value/error projections plus `set`,
/// `validate` and `touch` scoped to that key.
#[derive(Clone)]
pub struct FieldHandle {
    form: Form,
    key: String,
}

impl FieldHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Value {
        self.form
            .inner
            .own_state
            .lock_ref()
            .get(&self.key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn error(&self) -> Option<ErrorTree> {
        self.form.inner.own_errors.lock_ref().get(&self.key).cloned()
    }

    pub fn set(&self, value: impl Into<Value>) -> FormResult<()> {
        self.form.set(&self.key, value)
    }

    pub async fn validate(&self) -> FormResult<bool> {
        self.form.validate_field(&self.key).await
    }

    pub fn touch(&self) -> FormResult<()> {
        self.form.touch(&self.key)
    }

    pub fn value_signal(&self) -> BoxSignal<Value> {
        let key = self.key.clone();
        self.form
            .inner
            .own_state
            .signal_cloned()
            .map(move |own| own.get(&key).cloned().unwrap_or(Value::Null))
            .boxed()
    }

    pub fn error_signal(&self) -> BoxSignal<Option<ErrorTree>> {
        let key = self.key.clone();
        self.form
            .inner
            .own_errors
            .signal_cloned()
            .map(move |errors| errors.get(&key).cloned())
            .boxed()
    }
}

fn first_message(tree: &ErrorTree) -> Option<Arc<str>> {
    match tree {
        ErrorTree::Leaf(message) => message.clone(),
        ErrorTree::List(items) => items.iter().find_map(first_message),
        ErrorTree::Node(entries) => entries.values().find_map(first_message),
    }
}
