//! # Classfile Compiler Ground Truth
//!
//! ## Project Invariants
//!
//! 1. **One Template**: A project is exactly one template (`.gmx`) plus zero or
//!    more instances (`.spx`). Which extension plays which role is configuration,
//!    never inferred from content.
//!
//! 2. **Markers**: The template declares `GopGamePkg`, `GopClass` and `GopThis`
//!    as non-empty string constants. Missing any of them is `CLS001`.
//!
//! 3. **Override Scope**: Instances may redeclare `GopClass` only. The last
//!    instance to do so wins, and the merged `const GopClass` sits where that
//!    instance declared it.
//!
//! 4. **Merge Order**: Template declarations first, then each instance in
//!    caller order, each in document order. Re-running with the same inputs
//!    yields byte-identical output.
//!
//! 5. **Receiver Binding**: Every free function in the merged package carries
//!    the receiver (`GopThis`) and class it is compiled against.
//!
//! 6. **No Partial Output**: Any validation, parse or backend failure stops
//!    the project. The batch driver skips it and continues with the rest.
//!
//! ## Pipeline
//!
//! `parse → extract markers → validate → merge → backend`

mod backend;
mod cache;
mod compile;
mod discovery;
mod error;
mod logging;
mod markers;
mod merge;
mod parse;
mod validate;


pub use backend::{generate, Backend, GoSourceWriter, ImportEnv};
pub use cache::IncrementalCache;
pub use compile::{
    compile_dir, compile_projects, compile_units, BatchReport, CompileOptions, CompileResult,
    ProjectOutcome,
};
pub use discovery::{discover_projects, find_project_files, load_project, Project, ProjectConvention};
pub use error::{BackendFailure, ClassfileError, Result};
pub use logging::{init_json_logger, init_logger};
pub use markers::{extract_markers, ClassfileMarkers, Marker, MarkerEntry, MarkerTable};
pub use merge::{merge, MergedItem, MergedPackage, ReceiverBinding};
pub use parse::parse_source;
pub use validate::*;
