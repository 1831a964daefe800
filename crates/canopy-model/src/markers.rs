//! Marker keys
//!
//! Labels, annotations and finalizers written and read by canopy. Other
//! tooling (the CLI, GitOps pipelines) relies on these exact strings.

/// Prefix reserved for canopy markers
pub const META_PREFIX: &str = "canopy.dev/";

/// Finalizer placed on every intent
pub const FINALIZER: &str = "canopy.dev/finalizer";

/// Scope role label (`root` or `template`)
pub const LABEL_TYPE: &str = "canopy.dev/type";
/// Scope template reference label
pub const LABEL_TEMPLATE: &str = "canopy.dev/template";
/// Scope parent reference label
pub const LABEL_PARENT: &str = "canopy.dev/parent";
/// Created-by label
pub const LABEL_CREATED_BY: &str = "app.kubernetes.io/created-by";

/// Source scope of a propagated copy
pub const ANN_FROM: &str = "canopy.dev/from";
/// Propagation mode
pub const ANN_PROPAGATE: &str = "canopy.dev/propagate";
/// Deprecated: mode inherited by objects generated from an owner
pub const ANN_PROPAGATE_GENERATED: &str = "canopy.dev/propagate-generated";
/// Result cache for the owner check of generated objects
pub const ANN_GENERATED: &str = "canopy.dev/generated";

/// Value of [`LABEL_CREATED_BY`]
pub const CREATED_BY: &str = "canopy";
/// Role value for templates
pub const TYPE_TEMPLATE: &str = "template";
/// Role value for roots
pub const TYPE_ROOT: &str = "root";
/// Provision-once mode
pub const PROPAGATE_CREATE: &str = "create";
/// Keep-in-sync mode
pub const PROPAGATE_UPDATE: &str = "update";
/// In-memory index value matching either mode
pub const PROPAGATE_ANY: &str = "any";
/// Value of [`ANN_GENERATED`] once the owner has been checked
pub const NOT_GENERATED: &str = "false";

/// Field manager identity used for declarative metadata writes
pub const FIELD_MANAGER: &str = "canopy-controller";

/// Field index: scopes by parent reference
pub const INDEX_SCOPE_PARENT: &str = "scope.parent";
/// Field index: scopes by template reference
pub const INDEX_SCOPE_TEMPLATE: &str = "scope.template";
/// Field index: intents by name
pub const INDEX_INTENT_NAME: &str = "intent.name";
/// Field index: resources by propagation mode
pub const INDEX_PROPAGATE: &str = "resource.propagate";

/// Check whether a key falls under the reserved prefix
#[inline]
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(META_PREFIX)
}

/// Check whether a key is managed by the platform and must never be copied
#[inline]
#[must_use]
pub fn is_system_key(key: &str) -> bool {
    key.contains("kubernetes.io/")
}
