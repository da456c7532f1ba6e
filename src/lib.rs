mod form;
mod rules;
mod schema;
mod typedef;
mod validate;
mod value;


pub use form::{
    BoxSignal, FieldHandle, FieldMeta, FieldRef, Form, FormError, FormId, FormResult,
    ValidationTicket, create_form,
};
pub use rules::ValidationFault;
pub use schema::{Schema, SchemaEntry};
pub use typedef::{
    BoolDef, ElementDef, ListDef, MUST_BE_BOOL, MUST_BE_LIST, MUST_BE_NUMBER, MUST_BE_RECORD,
    MUST_BE_STRING, NumberDef, REQUIRED, RecordDef, StringDef, TypeDef, boolean, list, number,
    record, string,
};
pub use value::{ErrorTree, Value};
