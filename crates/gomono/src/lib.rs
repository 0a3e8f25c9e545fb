//! Monomorphization of signature-embedded generics.
//!
//! Input is a type-checked, annotated source tree in which generic declarations
//! introduce type parameters with `$T` markers in their first parenthesized list.
//! Output is the same tree with every generic declaration replaced by one concrete
//! specialization per distinct set of type arguments actually used.

pub mod binding;
pub mod cache;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod registry;
pub mod restrict;
pub mod rewrite;
pub mod subst;
pub mod tree;
pub mod visit;

pub use driver::{monomorphize, MonoMap, MonoOptions, MonoOutput};
pub use error::{MonoError, MonoErrorKind};
