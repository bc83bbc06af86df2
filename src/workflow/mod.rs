//! Workflow and permission engine.
//!
//! Pure, synchronous evaluation over already-loaded configuration. Nothing
//! here touches the database; `db::grants` persists the diffs these types
//! compute.

pub mod field_params;
pub mod grants;
pub mod responsible;
pub mod transitions;

pub use field_params::FieldParameters;
pub use grants::{field_access, GrantChange, GrantDiff, Grantee, GranteeContext, PermissionTable};
pub use responsible::{check_assignee, effective_policy, normalize_responsible, resolve_responsible};
pub use transitions::{check_edge, TransitionGraph};
