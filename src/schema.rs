use std::collections::BTreeMap;

use crate::form::Form;
use crate::typedef::{BoolDef, ListDef, NumberDef, RecordDef, StringDef, TypeDef};
use crate::value::Value;

/// One declared schema slot: a leaf definition, a raw nested schema (turned
/// into a sub-form at construction), or a pre-built form embedded as-is.
#[derive(Clone)]
pub enum SchemaEntry {
    Leaf(TypeDef),
    Nested(Schema),
    Form(Form),
}

/// Declarative field mapping. Keys keep declaration order and are unique;
/// redeclaring a key is a programming error and panics.
#[derive(Clone, Default)]
pub struct Schema {
    entries: Vec<(String, SchemaEntry)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, entry: impl Into<SchemaEntry>) -> Self {
        let key = key.into();
        assert!(
            !self.entries.iter().any(|(existing, _)| *existing == key),
            "duplicate schema key `{key}`"
        );
        self.entries.push((key, entry.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&SchemaEntry> {
        self.entries
            .iter()
            .find_map(|(existing, entry)| (existing == key).then_some(entry))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &SchemaEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default value tree derived purely from leaf defaults and nested
    /// defaults; no validation is involved.
    pub fn default_value(&self) -> Value {
        let entries = self
            .entries
            .iter()
            .map(|(key, entry)| {
                let value = match entry {
                    SchemaEntry::Leaf(def) => def.initial_value().clone(),
                    SchemaEntry::Nested(schema) => schema.default_value(),
                    SchemaEntry::Form(form) => form.initial_values(),
                };
                (key.clone(), value)
            })
            .collect();
        Value::Record(entries)
    }
}

/// Result of the one-shot construction-time walk over a schema: own keys
/// with their leaf defs and defaults, nested keys with their (possibly
/// freshly constructed) sub-forms. Immutable for the form's lifetime.
pub(crate) struct Classified {
    pub(crate) own_keys: Vec<String>,
    pub(crate) nested_keys: Vec<String>,
    pub(crate) leaves: BTreeMap<String, TypeDef>,
    pub(crate) forms: BTreeMap<String, Form>,
    pub(crate) own_defaults: BTreeMap<String, Value>,
}

pub(crate) fn classify(schema: &Schema) -> Classified {
    let mut classified = Classified {
        own_keys: Vec::new(),
        nested_keys: Vec::new(),
        leaves: BTreeMap::new(),
        forms: BTreeMap::new(),
        own_defaults: BTreeMap::new(),
    };

    for (key, entry) in schema.entries() {
        match entry {
            SchemaEntry::Leaf(def) => {
                classified.own_keys.push(key.to_owned());
                classified
                    .own_defaults
                    .insert(key.to_owned(), def.initial_value().clone());
                classified.leaves.insert(key.to_owned(), def.clone());
            }
            SchemaEntry::Form(form) => {
                classified.nested_keys.push(key.to_owned());
                classified.forms.insert(key.to_owned(), form.clone());
            }
            SchemaEntry::Nested(inner) => {
                classified.nested_keys.push(key.to_owned());
                classified
                    .forms
                    .insert(key.to_owned(), Form::new(inner.clone()));
            }
        }
    }

    classified
}

impl From<TypeDef> for SchemaEntry {
    fn from(def: TypeDef) -> Self {
        SchemaEntry::Leaf(def)
    }
}

impl From<NumberDef> for SchemaEntry {
    fn from(def: NumberDef) -> Self {
        SchemaEntry::Leaf(def.into())
    }
}

impl From<StringDef> for SchemaEntry {
    fn from(def: StringDef) -> Self {
        SchemaEntry::Leaf(def.into())
    }
}

impl From<BoolDef> for SchemaEntry {
    fn from(def: BoolDef) -> Self {
        SchemaEntry::Leaf(def.into())
    }
}

impl From<ListDef> for SchemaEntry {
    fn from(def: ListDef) -> Self {
        SchemaEntry::Leaf(def.into())
    }
}

impl From<RecordDef> for SchemaEntry {
    fn from(def: RecordDef) -> Self {
        SchemaEntry::Leaf(def.into())
    }
}

impl From<Schema> for SchemaEntry {
    fn from(schema: Schema) -> Self {
        SchemaEntry::Nested(schema)
    }
}

impl From<Form> for SchemaEntry {
    fn from(form: Form) -> Self {
        SchemaEntry::Form(form)
    }
}
