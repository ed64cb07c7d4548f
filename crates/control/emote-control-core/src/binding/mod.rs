//! Parameter bindings: descriptors, classification rules, tables and the cache.

pub mod cache;
pub mod descriptor;
pub mod rules;
pub mod table;

pub use cache::{content_hash, BindingCache, CacheRecord, PersistOutcome};
pub use descriptor::{Category, FrameLabel, ParameterDescriptor, RawParameter, Role};
pub use rules::{classify, default_rules, SemanticRule};
pub use table::BindingTable;
