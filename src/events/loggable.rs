use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for activity log entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Security-relevant changes: grants, transitions, memberships, deletions.
    Critical,
    #[default]
    Important,
    /// Routine events such as successful logins.
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities that can appear in the activity log.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. `template` in `template.locked`.
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "disabled" | "password_changed" => Severity::Critical,
            "login" => Severity::Noise,
            _ => self.severity(),
        }
    }
}
