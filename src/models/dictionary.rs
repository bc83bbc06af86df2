//! Closed dictionaries of the workflow domain.
//!
//! Every enum carries the string code used both in storage and on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

macro_rules! dictionary {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
        pub enum $name {
            $(#[serde(rename = $code)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok($name::$variant),)+
                    other => Err(AppError::bad_request(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

dictionary! {
    /// Position of a state in the workflow.
    StateType {
        Initial => "initial",
        Intermediate => "intermediate",
        Final => "final",
    }
}

dictionary! {
    /// What happens to the issue's responsible user on entering a state.
    StateResponsible {
        Keep => "keep",
        Assign => "assign",
        Remove => "remove",
    }
}

dictionary! {
    FieldType {
        Checkbox => "checkbox",
        Date => "date",
        Decimal => "decimal",
        Duration => "duration",
        Issue => "issue",
        List => "list",
        Number => "number",
        String => "string",
        Text => "text",
    }
}

dictionary! {
    /// Built-in roles resolved per issue rather than stored on the user.
    SystemRole {
        Anyone => "anyone",
        Author => "author",
        Responsible => "responsible",
    }
}

dictionary! {
    /// Access level to a field's value.
    ///
    /// `ReadWrite` implies `ReadOnly` for display, but the two are separate grants.
    FieldPermission {
        ReadOnly => "R",
        ReadWrite => "RW",
    }
}

dictionary! {
    TemplatePermission {
        ViewIssues => "issue.view",
        CreateIssues => "issue.create",
        EditIssues => "issue.edit",
        ReassignIssues => "issue.reassign",
        SuspendIssues => "issue.suspend",
        ResumeIssues => "issue.resume",
        AddComments => "comment.add",
        PrivateComments => "comment.private",
        AttachFiles => "file.attach",
        DeleteFiles => "file.delete",
        AddDependencies => "dependency.add",
        RemoveDependencies => "dependency.remove",
        DeleteIssues => "issue.delete",
    }
}

impl StateType {
    pub fn is_final(&self) -> bool {
        matches!(self, StateType::Final)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_from_str() {
        for role in SystemRole::ALL {
            assert_eq!(role.as_str().parse::<SystemRole>().unwrap(), *role);
        }
        for perm in TemplatePermission::ALL {
            assert_eq!(perm.as_str().parse::<TemplatePermission>().unwrap(), *perm);
        }
    }

    #[test]
    fn unknown_code_is_bad_request() {
        let err = "superuser".parse::<SystemRole>().unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn serde_uses_storage_codes() {
        let json = serde_json::to_string(&FieldPermission::ReadWrite).unwrap();
        assert_eq!(json, "\"RW\"");
        let parsed: StateType = serde_json::from_str("\"final\"").unwrap();
        assert_eq!(parsed, StateType::Final);
        assert_eq!(FieldType::ALL.len(), 9);
    }
}
