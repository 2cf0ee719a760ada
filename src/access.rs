//! Tuple-level types shared by the storage layer and its callers.
//!
//! - **TupleDesc**: fixed-width layout of a table's rows
//! - **Tuple**: a row, plus its [`RecordId`] once stored
//! - **Field / FieldType**: column values and their on-page encoding

pub mod tuple;
pub mod value;

pub use tuple::{RecordId, TdItem, Tuple, TupleDesc};
pub use value::{Field, FieldType, STRING_LEN};
