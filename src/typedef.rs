use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use regex::Regex;

use crate::rules::{AsyncRule, RuleSet, SyncRule, ValidationFault};
use crate::schema::{Schema, SchemaEntry};
use crate::value::{ErrorTree, Value};

pub const MUST_BE_NUMBER: &str = "Must be a number";
pub const MUST_BE_STRING: &str = "Must be a string";
pub const MUST_BE_BOOL: &str = "Must be a boolean";
pub const MUST_BE_LIST: &str = "Must be a list";
pub const MUST_BE_RECORD: &str = "Must be a record";
pub const REQUIRED: &str = "Required field";

/// Immutable leaf definition: a default value plus ordered sync/async rule
/// phases, and for list/record leaves a recursive element shape. Every
/// mutator clones the receiver and appends one rule; instances are never
/// mutated in place, so builder chains may branch freely.
#[derive(Clone)]
pub struct TypeDef {
    initial: Value,
    rules: RuleSet,
    element: Option<ElementDef>,
    debounce: Option<Duration>,
}

impl TypeDef {
    fn new(initial: Value) -> Self {
        Self {
            initial,
            rules: RuleSet::default(),
            element: None,
            debounce: None,
        }
    }

    pub fn initial_value(&self) -> &Value {
        &self.initial
    }

    pub fn has_async_rules(&self) -> bool {
        self.rules.has_async() || self.element.is_some()
    }

    pub(crate) fn debounce(&self) -> Option<Duration> {
        self.debounce
    }

    fn with_initial(&self, initial: Value) -> Self {
        let mut next = self.clone();
        next.initial = initial;
        next
    }

    fn with_debounce(&self, debounce: Duration) -> Self {
        let mut next = self.clone();
        next.debounce = Some(debounce);
        next
    }

    fn with_sync_rule(
        &self,
        message: Option<Arc<str>>,
        validator: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        let mut next = self.clone();
        next.rules = self.rules.with_sync(SyncRule {
            validator: Arc::new(validator),
            message,
        });
        next
    }

    fn with_async_rule<F, Fut>(&self, message: Option<Arc<str>>, validator: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, ValidationFault>> + Send + 'static,
    {
        let wrapped: crate::rules::AsyncValidatorFn =
            Arc::new(move |value, state| Box::pin(validator(value, state)));
        let mut next = self.clone();
        next.rules = self.rules.with_async(AsyncRule {
            validator: wrapped,
            message,
        });
        next
    }

    fn required(&self, message: Option<Arc<str>>) -> Self {
        let message = message.unwrap_or_else(|| REQUIRED.into());
        self.with_sync_rule(Some(message), Value::is_present)
    }

    /// Synchronous phase: own rules in declaration order, then (for
    /// list/record leaves) the element shape. The first failing rule
    /// short-circuits everything after it.
    pub(crate) fn check_sync(&self, value: &Value) -> ErrorTree {
        if let Some(message) = self.rules.run_sync(value) {
            return ErrorTree::Leaf(Some(message));
        }
        match &self.element {
            None => ErrorTree::clean(),
            Some(element) => element.check_container_sync(value),
        }
    }

    /// Asynchronous phase. Entered only after the sync phase passed.
    pub(crate) fn check_async<'a>(
        &'a self,
        value: &'a Value,
        state: &'a Value,
    ) -> BoxFuture<'a, ErrorTree> {
        Box::pin(async move {
            if let Some(message) = self.rules.run_async(value, state).await {
                return ErrorTree::Leaf(Some(message));
            }
            match &self.element {
                None => ErrorTree::clean(),
                Some(element) => element.check_container_async(value, state).await,
            }
        })
    }
}

/// Shape validated recursively inside a list or record leaf: either a single
/// leaf definition per element, or a keyed record schema.
#[derive(Clone)]
pub enum ElementDef {
    Leaf(Box<TypeDef>),
    Record(Schema),
}

impl ElementDef {
    fn check_sync(&self, value: &Value) -> ErrorTree {
        match self {
            ElementDef::Leaf(def) => def.check_sync(value),
            ElementDef::Record(schema) => check_record_sync(schema, value),
        }
    }

    fn check_async<'a>(&'a self, value: &'a Value, state: &'a Value) -> BoxFuture<'a, ErrorTree> {
        Box::pin(async move {
            match self {
                ElementDef::Leaf(def) => {
                    let sync = def.check_sync(value);
                    if !sync.is_valid() {
                        return sync;
                    }
                    def.check_async(value, state).await
                }
                ElementDef::Record(schema) => check_record_async(schema, value, state).await,
            }
        })
    }

    /// Applies the shape to the container value held by the owning leaf:
    /// element-wise for lists, keyed for records. The owning leaf's type
    /// rule has already established the container kind.
    fn check_container_sync(&self, value: &Value) -> ErrorTree {
        match value {
            Value::List(items) => {
                let trees: Vec<ErrorTree> = items.iter().map(|item| self.check_sync(item)).collect();
                collapse_list(trees)
            }
            Value::Record(_) => match self {
                ElementDef::Record(schema) => check_record_sync(schema, value),
                ElementDef::Leaf(def) => def.check_sync(value),
            },
            _ => ErrorTree::clean(),
        }
    }

    async fn check_container_async(&self, value: &Value, state: &Value) -> ErrorTree {
        match value {
            Value::List(items) => {
                let trees =
                    join_all(items.iter().map(|item| self.check_async(item, state))).await;
                collapse_list(trees)
            }
            Value::Record(_) => match self {
                ElementDef::Record(schema) => check_record_async(schema, value, state).await,
                ElementDef::Leaf(def) => def.check_async(value, state).await,
            },
            _ => ErrorTree::clean(),
        }
    }
}

fn collapse_list(trees: Vec<ErrorTree>) -> ErrorTree {
    if trees.iter().all(ErrorTree::is_valid) {
        ErrorTree::clean()
    } else {
        ErrorTree::List(trees)
    }
}

fn collapse_node(entries: Vec<(String, ErrorTree)>) -> ErrorTree {
    let failing: std::collections::BTreeMap<String, ErrorTree> = entries
        .into_iter()
        .filter(|(_, tree)| !tree.is_valid())
        .collect();
    if failing.is_empty() {
        ErrorTree::clean()
    } else {
        ErrorTree::Node(failing)
    }
}

fn check_record_sync(schema: &Schema, value: &Value) -> ErrorTree {
    let entries = schema
        .entries()
        .map(|(key, entry)| {
            let slot = value.get(key).unwrap_or(&Value::Null);
            let tree = match entry {
                SchemaEntry::Leaf(def) => def.check_sync(slot),
                SchemaEntry::Nested(inner) => check_record_sync(inner, slot),
                // a pre-built form is stateful, not a data shape; leaves
                // inside a record leaf must be defs or nested schemas
                SchemaEntry::Form(_) => ErrorTree::clean(),
            };
            (key.to_owned(), tree)
        })
        .collect();
    collapse_node(entries)
}

fn check_record_async<'a>(
    schema: &'a Schema,
    value: &'a Value,
    state: &'a Value,
) -> BoxFuture<'a, ErrorTree> {
    Box::pin(async move {
        let futures = schema.entries().map(|(key, entry)| async move {
            let slot = value.get(key).unwrap_or(&Value::Null);
            let tree = match entry {
                SchemaEntry::Leaf(def) => {
                    let sync = def.check_sync(slot);
                    if sync.is_valid() {
                        def.check_async(slot, state).await
                    } else {
                        sync
                    }
                }
                SchemaEntry::Nested(inner) => check_record_async(inner, slot, state).await,
                SchemaEntry::Form(_) => ErrorTree::clean(),
            };
            (key.to_owned(), tree)
        });
        collapse_node(join_all(futures).await)
    })
}

macro_rules! common_rule_methods {
    () => {
        /// Replaces the default value, leaving the rule chain untouched.
        pub fn initial(&self, value: impl Into<Value>) -> Self {
            Self(self.0.with_initial(value.into()))
        }

        pub fn required(&self, message: impl Into<Arc<str>>) -> Self {
            Self(self.0.required(Some(message.into())))
        }

        /// `required` with the published default message ([`REQUIRED`]).
        pub fn required_default(&self) -> Self {
            Self(self.0.required(None))
        }

        /// Custom synchronous rule.
        pub fn rule(
            &self,
            message: impl Into<Arc<str>>,
            validator: impl Fn(&Value) -> bool + Send + Sync + 'static,
        ) -> Self {
            Self(self.0.with_sync_rule(Some(message.into()), validator))
        }

        /// Custom asynchronous rule. The validator receives the value under
        /// test and a snapshot of the owning form's full value tree; a
        /// returned fault becomes the field's error message.
        pub fn validation<F, Fut>(&self, message: impl Into<Arc<str>>, validator: F) -> Self
        where
            F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<bool, ValidationFault>> + Send + 'static,
        {
            Self(self.0.with_async_rule(Some(message.into()), validator))
        }

        /// Delays this leaf's async phase; a newer validation request started
        /// during the delay wins and the delayed one is discarded.
        pub fn debounce_ms(&self, millis: u64) -> Self {
            Self(self.0.with_debounce(Duration::from_millis(millis)))
        }

        pub fn into_def(self) -> TypeDef {
            self.0
        }
    };
}

#[derive(Clone)]
pub struct NumberDef(TypeDef);

impl NumberDef {
    common_rule_methods!();

    pub fn min(&self, bound: f64, message: impl Into<Arc<str>>) -> Self {
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_number().is_some_and(|n| n > bound)
        }))
    }

    pub fn max(&self, bound: f64, message: impl Into<Arc<str>>) -> Self {
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_number().is_some_and(|n| n < bound)
        }))
    }

    pub fn positive(&self, message: impl Into<Arc<str>>) -> Self {
        Self(self.0.with_sync_rule(Some(message.into()), |value| {
            value.as_number().is_some_and(|n| n > 0.0)
        }))
    }

    pub fn negative(&self, message: impl Into<Arc<str>>) -> Self {
        Self(self.0.with_sync_rule(Some(message.into()), |value| {
            value.as_number().is_some_and(|n| n < 0.0)
        }))
    }
}

#[derive(Clone)]
pub struct StringDef(TypeDef);

impl StringDef {
    common_rule_methods!();

    pub fn pattern(&self, pattern: Regex, message: impl Into<Arc<str>>) -> Self {
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_str().is_some_and(|s| pattern.is_match(s))
        }))
    }

    pub fn length(&self, exact: usize, message: impl Into<Arc<str>>) -> Self {
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_str().is_some_and(|s| s.chars().count() == exact)
        }))
    }

    /// Exclusive bounds: the length must be strictly between `min` and `max`.
    pub fn length_range(&self, min: usize, max: usize, message: impl Into<Arc<str>>) -> Self {
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_str().is_some_and(|s| {
                let len = s.chars().count();
                len > min && len < max
            })
        }))
    }

    pub fn starts_with(&self, prefix: impl Into<String>, message: impl Into<Arc<str>>) -> Self {
        let prefix = prefix.into();
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_str().is_some_and(|s| s.starts_with(&prefix))
        }))
    }

    pub fn ends_with(&self, suffix: impl Into<String>, message: impl Into<Arc<str>>) -> Self {
        let suffix = suffix.into();
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_str().is_some_and(|s| s.ends_with(&suffix))
        }))
    }

    pub fn one_of<I, S>(&self, options: I, message: impl Into<Arc<str>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        Self(self.0.with_sync_rule(Some(message.into()), move |value| {
            value.as_str().is_some_and(|s| options.iter().any(|o| o == s))
        }))
    }
}

#[derive(Clone)]
pub struct BoolDef(TypeDef);

impl BoolDef {
    common_rule_methods!();
}

#[derive(Clone)]
pub struct ListDef(TypeDef);

impl ListDef {
    common_rule_methods!();
}

#[derive(Clone)]
pub struct RecordDef(TypeDef);

impl RecordDef {
    common_rule_methods!();
}

/// Numeric leaf, default `0`.
pub fn number() -> NumberDef {
    NumberDef(
        TypeDef::new(Value::Number(0.0))
            .with_sync_rule(Some(MUST_BE_NUMBER.into()), |value| {
                matches!(value, Value::Number(_))
            }),
    )
}

/// String leaf, default `""`.
pub fn string() -> StringDef {
    StringDef(
        TypeDef::new(Value::String(String::new()))
            .with_sync_rule(Some(MUST_BE_STRING.into()), |value| {
                matches!(value, Value::String(_))
            }),
    )
}

/// Boolean leaf, default `false`.
pub fn boolean() -> BoolDef {
    BoolDef(
        TypeDef::new(Value::Bool(false)).with_sync_rule(Some(MUST_BE_BOOL.into()), |value| {
            matches!(value, Value::Bool(_))
        }),
    )
}

/// List leaf: every element is validated against `element`, both phases.
pub fn list(element: impl Into<ElementDef>, initial: Vec<Value>) -> ListDef {
    let mut def = TypeDef::new(Value::List(initial)).with_sync_rule(
        Some(MUST_BE_LIST.into()),
        |value| matches!(value, Value::List(_)),
    );
    def.element = Some(element.into());
    ListDef(def)
}

/// Record leaf: one keyed value validated recursively against `schema`,
/// held (and replaced by `set`) as a single slot.
pub fn record(schema: Schema) -> RecordDef {
    let initial = schema.default_value();
    let mut def = TypeDef::new(initial).with_sync_rule(Some(MUST_BE_RECORD.into()), |value| {
        matches!(value, Value::Record(_))
    });
    def.element = Some(ElementDef::Record(schema));
    RecordDef(def)
}

impl From<NumberDef> for TypeDef {
    fn from(def: NumberDef) -> Self {
        def.0
    }
}

impl From<StringDef> for TypeDef {
    fn from(def: StringDef) -> Self {
        def.0
    }
}

impl From<BoolDef> for TypeDef {
    fn from(def: BoolDef) -> Self {
        def.0
    }
}

impl From<ListDef> for TypeDef {
    fn from(def: ListDef) -> Self {
        def.0
    }
}

impl From<RecordDef> for TypeDef {
    fn from(def: RecordDef) -> Self {
        def.0
    }
}

impl From<NumberDef> for ElementDef {
    fn from(def: NumberDef) -> Self {
        ElementDef::Leaf(Box::new(def.0))
    }
}

impl From<StringDef> for ElementDef {
    fn from(def: StringDef) -> Self {
        ElementDef::Leaf(Box::new(def.0))
    }
}

impl From<BoolDef> for ElementDef {
    fn from(def: BoolDef) -> Self {
        ElementDef::Leaf(Box::new(def.0))
    }
}

impl From<TypeDef> for ElementDef {
    fn from(def: TypeDef) -> Self {
        ElementDef::Leaf(Box::new(def))
    }
}

impl From<Schema> for ElementDef {
    fn from(schema: Schema) -> Self {
        ElementDef::Record(schema)
    }
}
