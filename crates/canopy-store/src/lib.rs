//! Canopy object store
//!
//! The store API every canopy component is written against, and a complete
//! in-process implementation:
//! - [`ObjectStore`]: get/list/watch/create/update/patch/apply/delete plus discovery
//! - [`ObjectStoreExt`]: typed access through serde
//! - [`FieldIndexer`]: named index extractors for `list` filters
//! - [`InMemoryStore`]: optimistic concurrency, finalizers, field ownership, watch
//!
//! # Example
//!
//! ```rust,ignore
//! use canopy_model::{Role, Scope};
//! use canopy_store::{InMemoryStore, ObjectStoreExt};
//!
//! let store = InMemoryStore::new();
//! store.create(&Scope::gvk(), &Scope::new("team-a").with_role(Role::Root), "admin").await?;
//! ```

#![warn(unreachable_pub)]

pub mod api;
pub mod error;
pub mod index;
pub mod memory;
pub mod merge;
pub mod ownership;

pub use api::{
    to_object_json, KindInfo, ListParams, MetadataApply, ObjectStore, ObjectStoreExt, Verb,
    WatchEvent, WatchStream,
};
pub use error::{ignore_not_found, StoreError};
pub use index::{annotation_of, label_of, FieldIndexer};
pub use memory::{read_meta, InMemoryStore};
