//! Responsible-assignment policy applied when an issue enters a state.

use std::collections::{BTreeSet, HashSet};

use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::dictionary::{StateResponsible, StateType};
use crate::models::state::State;

/// Policy actually applied on entering `state`. Final states always clear the
/// responsible user, whatever is stored.
pub fn effective_policy(state: &State) -> StateResponsible {
    if state.is_final() {
        StateResponsible::Remove
    } else {
        state.responsible
    }
}

/// Picks the stored policy for a state being written.
///
/// Final states only accept `remove`; an omitted policy defaults to `remove`
/// for final states and `keep` for the rest.
pub fn normalize_responsible(
    state_type: StateType,
    requested: Option<StateResponsible>,
) -> AppResult<StateResponsible> {
    match (state_type, requested) {
        (StateType::Final, None | Some(StateResponsible::Remove)) => Ok(StateResponsible::Remove),
        (StateType::Final, Some(other)) => Err(AppError::conflict(format!(
            "final states must remove the responsible, '{}' is not allowed",
            other
        ))),
        (_, None) => Ok(StateResponsible::Keep),
        (_, Some(policy)) => Ok(policy),
    }
}

/// New responsible user of an issue moving into `to_state`.
pub fn resolve_responsible(
    to_state: &State,
    current: Option<Uuid>,
    supplied: Option<Uuid>,
) -> AppResult<Option<Uuid>> {
    match effective_policy(to_state) {
        StateResponsible::Keep => Ok(current),
        StateResponsible::Remove => Ok(None),
        StateResponsible::Assign => supplied.map(Some).ok_or_else(|| {
            AppError::missing_responsible(format!(
                "state '{}' requires a responsible user",
                to_state.name
            ))
        }),
    }
}

/// Checks that an assignee belongs to one of the state's responsible groups.
/// An empty group set falls back to any group visible to the project.
pub fn check_assignee(
    responsible_groups: &BTreeSet<Uuid>,
    project_groups: &HashSet<Uuid>,
    assignee_groups: &HashSet<Uuid>,
) -> AppResult<()> {
    if responsible_groups.is_empty() {
        if project_groups.iter().any(|g| assignee_groups.contains(g)) {
            return Ok(());
        }
        return Err(AppError::bad_request(
            "the supplied responsible is not a member of any group of this project",
        ));
    }
    if responsible_groups.iter().any(|g| assignee_groups.contains(g)) {
        Ok(())
    } else {
        Err(AppError::bad_request(
            "the supplied responsible is not a member of any responsible group",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(state_type: StateType, responsible: StateResponsible) -> State {
        let now = Utc::now();
        State {
            id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            name: "Target".to_string(),
            state_type,
            responsible,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn keep_returns_current() {
        let u = Uuid::new_v4();
        let to = state(StateType::Intermediate, StateResponsible::Keep);
        assert_eq!(resolve_responsible(&to, Some(u), None).unwrap(), Some(u));
        assert_eq!(resolve_responsible(&to, None, Some(u)).unwrap(), None);
    }

    #[test]
    fn remove_clears() {
        let to = state(StateType::Intermediate, StateResponsible::Remove);
        assert_eq!(resolve_responsible(&to, Some(Uuid::new_v4()), None).unwrap(), None);
    }

    #[test]
    fn assign_takes_supplied_or_fails() {
        let v = Uuid::new_v4();
        let to = state(StateType::Intermediate, StateResponsible::Assign);
        assert_eq!(resolve_responsible(&to, Some(Uuid::new_v4()), Some(v)).unwrap(), Some(v));

        let err = resolve_responsible(&to, Some(Uuid::new_v4()), None).unwrap_err();
        assert!(matches!(err, AppError::MissingResponsible(_)));
    }

    #[test]
    fn final_state_always_removes() {
        // A stale stored value must not leak through.
        let to = state(StateType::Final, StateResponsible::Assign);
        assert_eq!(resolve_responsible(&to, Some(Uuid::new_v4()), None).unwrap(), None);
    }

    #[test]
    fn normalization_rejects_non_remove_on_final() {
        assert_eq!(normalize_responsible(StateType::Final, None).unwrap(), StateResponsible::Remove);
        assert_eq!(normalize_responsible(StateType::Initial, None).unwrap(), StateResponsible::Keep);
        assert_eq!(
            normalize_responsible(StateType::Intermediate, Some(StateResponsible::Assign)).unwrap(),
            StateResponsible::Assign
        );
        let err = normalize_responsible(StateType::Final, Some(StateResponsible::Keep)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn assignee_must_share_a_responsible_group() {
        let support = Uuid::new_v4();
        let other = Uuid::new_v4();
        let project = HashSet::from([support, other]);
        let groups = BTreeSet::from([support]);
        assert!(check_assignee(&groups, &project, &HashSet::from([support])).is_ok());
        assert!(check_assignee(&groups, &project, &HashSet::from([other])).is_err());
        assert!(check_assignee(&groups, &project, &HashSet::new()).is_err());
    }

    #[test]
    fn without_responsible_groups_any_project_group_qualifies() {
        let support = Uuid::new_v4();
        let project = HashSet::from([support]);
        assert!(check_assignee(&BTreeSet::new(), &project, &HashSet::from([support])).is_ok());
        assert!(check_assignee(&BTreeSet::new(), &project, &HashSet::from([Uuid::new_v4()])).is_err());
        assert!(check_assignee(&BTreeSet::new(), &project, &HashSet::new()).is_err());
    }
}
