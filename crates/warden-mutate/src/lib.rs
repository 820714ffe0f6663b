//! warden-mutate — safe edits to the proxy core's live configuration.
//!
//! # Protocol
//!
//! ```text
//! lock <live>.lock
//!   └─ structural patch in memory                  (unresolved selector aborts)
//!        └─ snapshot live → backups/<name>.<id>.json   (failure aborts)
//!             └─ temp file → rename over live
//!                  └─ validate (sing-box check -c <live>)
//!                       ├─ ok     → caller may reload
//!                       └─ failed → ValidationFailed { backup }, live stays patched
//! ```
//!
//! Rollback snapshots the current document before restoring the chosen
//! backup and then validates like any other mutation.

pub mod backup;
pub mod document;
pub mod editor;
pub mod error;
pub mod selector;
pub mod validate;

pub use backup::{BackupStore, Snapshot};
pub use document::{ConfigDocument, FieldPatch, editable_fields, parse_value};
pub use editor::{Applied, Change, ConfigEditor, RolledBack};
pub use error::{MutateError, MutateResult};
pub use selector::{Selector, Step};
pub use validate::{CommandValidator, Validation, Validator};
