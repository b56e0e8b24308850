//! Naming service: `NameComponent` escaping, `NamingContext` bind/resolve
//! tree, and `Dir`'s filesystem-backed temp file helper (spec.md §4.12).

pub mod component;
pub mod context;
pub mod dir;

pub use component::{append_string, name_from_string, name_to_string, to_component, Name, NameComponent};
pub use context::{Binding, BindingIterator, BindingKind, NamingContext, NamingError};
pub use dir::{Dir, DirError};
