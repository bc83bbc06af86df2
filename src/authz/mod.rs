//! Authorization module - voter and principal context
//!
//! Every command handler asks the voter before mutating anything:
//! - the subject must be the variant registered for the action
//! - the principal must be authenticated and enabled
//! - the per-action rule decides (admin, lock state, self, grants)
//!
//! A denial is a plain `false`; [`ensure_granted`] turns it into
//! `AppError::AccessDenied` for handlers.

mod action;
mod evaluator;
mod principal;

pub use action::{Action, Subject, SubjectKind, TemplateSubject, TransitionSubject};
pub use evaluator::{Voter, WorkflowVoter};
pub use principal::Principal;

use crate::errors::{AppError, AppResult};

/// Asks `voter` and maps a denial to `AccessDenied`.
pub fn ensure_granted(
    voter: &dyn Voter,
    principal: &Principal,
    action: Action,
    subject: &Subject<'_>,
) -> AppResult<()> {
    if voter.is_granted(Some(principal), action, subject) {
        Ok(())
    } else {
        Err(AppError::access_denied(format!("{action} is not allowed")))
    }
}
