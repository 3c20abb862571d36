//! # Define Core
//!
//! Shared-object definitions with batched change tracking.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 define-core                 │
//! ├─────────────────────────────────────────────┤
//! │  Registry            │  Schema compiler     │
//! │  - Dotted names      │  - Field accessors   │
//! │  - Identity tables   │  - Plain factories   │
//! │  - Consistency pass  │  - Typed classes     │
//! ├─────────────────────────────────────────────┤
//! │  Observation graph   │  Change batcher      │
//! │  - Ref-counted       │  - One flush / tick  │
//! │    listeners         │  - Compact + pretty  │
//! │  - Nested propagation│    commits           │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use define_core::{observe, IdentityTable, Listener, ManualScheduler, Registry};
//! use serde_json::json;
//!
//! let mut registry = Registry::new();
//! let point = registry.plain("app.Point", &json!({"x": 0, "y": 0})).unwrap();
//! registry.load_identity_table(&IdentityTable::from_json(r#"{"app.Point": 1}"#).unwrap());
//! registry.freeze().unwrap();
//!
//! let scheduler = Arc::new(ManualScheduler::new());
//! let commits = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&commits);
//! let listener = Listener::new(scheduler.clone(), move |compact, _pretty| {
//!     sink.lock().unwrap().push(compact.to_json().unwrap());
//! });
//!
//! let p = point.construct([("x", 0), ("y", 0)]).unwrap();
//! observe::attach(&p, &[listener]);
//! p.set("x", 5).unwrap();
//! p.set("y", 7).unwrap();
//! scheduler.run_tick().unwrap();
//!
//! let id = p.identity().unwrap();
//! assert_eq!(
//!     commits.lock().unwrap()[0],
//!     format!(r#"{{"CREATE":[],"DESTROY":[],"SET":[[{id},[0,5,1,7]]]}}"#)
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod class;
pub mod commit;
pub mod config;
pub mod error;
pub mod factory;
pub mod ids;
pub mod listener;
pub mod object;
pub mod observe;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod table;
pub mod value;

pub use class::{ClassHandle, SchemaClass};
pub use commit::{CompactCommit, CompactCreate, CompactSet, PrettyCommit, PrettyDestroy, PrettyEntry};
pub use config::RegistryConfig;
pub use error::{DefineError, DefineResult};
pub use factory::PlainFactory;
pub use ids::{Identity, IdentityAllocator};
pub use listener::{Listener, ListenerId, UpdateBatch};
pub use object::{Shape, SharedObject};
pub use registry::{DefinedValue, Definition, DefinitionKind, Phase, Registry};
pub use scheduler::{FlushTask, ManualScheduler, Scheduler, TokioScheduler};
pub use schema::{Field, FieldSpec, FieldType, Schema, SchemaDescription, SchemaRef};
pub use table::IdentityTable;
pub use value::{FunctionRef, Value};

/// Define core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
