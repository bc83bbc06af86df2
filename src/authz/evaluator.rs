use chrono::Utc;

use super::action::{Action, Subject, TemplateSubject, TransitionSubject};
use super::principal::Principal;
use crate::models::dictionary::{FieldType, StateResponsible, StateType, TemplatePermission};

/// Grants or denies a single action against a single subject.
///
/// Implementations must be pure: no I/O, no side effects, so callers may ask
/// speculatively (e.g. to decide which controls to offer).
pub trait Voter: Send + Sync {
    fn is_granted(&self, principal: Option<&Principal>, action: Action, subject: &Subject<'_>) -> bool;
}

/// Default voter for the workflow engine.
///
/// Evaluation order:
/// 1. subject variant must match the one registered for the action
/// 2. principal must be present and not disabled
/// 3. per-action rule
#[derive(Debug, Clone, Default)]
pub struct WorkflowVoter;

impl WorkflowVoter {
    pub fn new() -> Self {
        Self
    }

    fn rule(principal: &Principal, action: Action, subject: &Subject<'_>) -> Result<(), &'static str> {
        use Action::*;

        let admin = || require(principal.is_admin(), "admin required");

        match (action, subject) {
            (CreateProject | CreateGroup | CreateUser, Subject::None) => admin(),

            (UpdateProject | DeleteProject | CreateTemplate, Subject::Project(_)) => admin(),
            (SuspendProject, Subject::Project(project)) => {
                admin()?;
                require(!project.is_suspended, "project already suspended")
            }
            (ResumeProject, Subject::Project(project)) => {
                admin()?;
                require(project.is_suspended, "project is not suspended")
            }

            (ViewTemplate, Subject::Template(subject)) => {
                if principal.is_admin() {
                    return Ok(());
                }
                require(holds_view_grant(principal, subject), "no view grant on template")
            }
            (UpdateTemplate | DeleteTemplate | ManageTemplatePermissions, Subject::Template(_)) => admin(),
            (LockTemplate, Subject::Template(subject)) => {
                admin()?;
                require(!subject.template.is_locked, "template already locked")
            }
            (UnlockTemplate, Subject::Template(subject)) => {
                admin()?;
                require(subject.template.is_locked, "template is not locked")?;
                require(subject.has_initial_state, "template has no initial state")
            }
            (CreateState, Subject::Template(subject)) => {
                admin()?;
                require(subject.template.is_locked, "template is not locked")
            }

            (UpdateState | DeleteState | CreateField, Subject::State { template, .. }) => {
                // TODO: refuse DeleteState once issues can reference the state.
                admin()?;
                require(template.is_locked, "template is not locked")
            }
            (SetInitialState, Subject::State { state, template }) => {
                admin()?;
                require(template.is_locked, "template is not locked")?;
                require(state.state_type != StateType::Initial, "state is already initial")
            }
            (ManageTransitions, Subject::State { state, template }) => {
                admin()?;
                require(template.is_locked, "template is not locked")?;
                require(!state.is_final(), "final state has no transitions")
            }
            (ManageResponsibleGroups, Subject::State { state, template }) => {
                admin()?;
                require(template.is_locked, "template is not locked")?;
                require(
                    state.responsible == StateResponsible::Assign,
                    "state does not assign a responsible",
                )
            }

            (UpdateField | DeleteField | ManageFieldPermissions, Subject::Field { template, .. }) => {
                admin()?;
                require(template.is_locked, "template is not locked")
            }
            (CreateListItem, Subject::Field { field, template }) => {
                admin()?;
                require(template.is_locked, "template is not locked")?;
                require(field.field_type == FieldType::List, "field is not a list")
            }
            (UpdateListItem | DeleteListItem, Subject::ListItem { template, .. }) => {
                admin()?;
                require(template.is_locked, "template is not locked")
            }

            (UpdateGroup | DeleteGroup | ManageGroupMembers, Subject::Group(_)) => admin(),

            (UpdateUser | SetPassword, Subject::User(user)) => {
                require(principal.is_admin() || principal.user_id == user.id, "admin or self required")
            }
            (DeleteUser, Subject::User(user)) => {
                admin()?;
                require(principal.user_id != user.id, "cannot delete yourself")
            }
            (DisableUser, Subject::User(user)) => {
                admin()?;
                require(principal.user_id != user.id, "cannot disable yourself")?;
                require(!user.is_disabled, "user already disabled")
            }
            (EnableUser, Subject::User(user)) => {
                admin()?;
                require(user.is_disabled, "user is not disabled")
            }
            (UnlockUser, Subject::User(user)) => {
                admin()?;
                require(user.is_locked_at(Utc::now()), "user is not locked out")
            }

            (ExecuteTransition, Subject::Transition(subject)) => can_transition(principal, subject),

            _ => Err("subject does not match action"),
        }
    }
}

fn require(condition: bool, reason: &'static str) -> Result<(), &'static str> {
    if condition {
        Ok(())
    } else {
        Err(reason)
    }
}

fn holds_view_grant(principal: &Principal, subject: &TemplateSubject<'_>) -> bool {
    let Some(permissions) = subject.permissions else {
        return false;
    };
    let ctx = principal.grantees(&[]);
    [TemplatePermission::ViewIssues, TemplatePermission::CreateIssues]
        .into_iter()
        .any(|p| permissions.has_permission(p, &ctx))
}

fn can_transition(principal: &Principal, subject: &TransitionSubject<'_>) -> Result<(), &'static str> {
    require(!subject.project.is_suspended, "project is suspended")?;
    require(!subject.template.is_locked, "template is locked for editing")?;
    require(subject.from.template_id == subject.to.template_id, "states belong to different templates")?;
    let ctx = principal.grantees(subject.roles);
    require(
        subject.graph.allowed_transitions(subject.from, &ctx).contains(&subject.to.id),
        "no transition grant",
    )
}

impl Voter for WorkflowVoter {
    fn is_granted(&self, principal: Option<&Principal>, action: Action, subject: &Subject<'_>) -> bool {
        // 1. Registered subject type
        if subject.kind() != action.subject_kind() {
            tracing::debug!(%action, expected = ?action.subject_kind(), got = ?subject.kind(), "voter abstains");
            return false;
        }

        // 2. Authenticated, active principal
        let Some(principal) = principal.filter(|p| p.is_active()) else {
            tracing::debug!(%action, "unauthenticated or disabled principal");
            return false;
        };

        // 3. Rule
        match Self::rule(principal, action, subject) {
            Ok(()) => {
                tracing::debug!(user_id = %principal.user_id, %action, "granted");
                true
            }
            Err(reason) => {
                tracing::debug!(user_id = %principal.user_id, %action, reason, "denied");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dictionary::SystemRole;
    use crate::models::field::Field;
    use crate::models::project::Project;
    use crate::models::state::State;
    use crate::models::template::Template;
    use crate::models::user::User;
    use crate::workflow::{Grantee, PermissionTable, TransitionGraph};
    use chrono::Duration;
    use uuid::Uuid;

    fn project() -> Project {
        let now = Utc::now();
        Project {
            id: Uuid::new_v4(),
            name: "Helpdesk".into(),
            description: None,
            is_suspended: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn template(project: &Project, is_locked: bool) -> Template {
        let now = Utc::now();
        Template {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: "Incident".into(),
            prefix: "INC".into(),
            description: None,
            critical_age: None,
            frozen_time: None,
            is_locked,
            created_at: now,
            updated_at: now,
        }
    }

    fn state(template: &Template, name: &str, state_type: StateType) -> State {
        let now = Utc::now();
        State {
            id: Uuid::new_v4(),
            template_id: template.id,
            name: name.into(),
            state_type,
            responsible: if state_type == StateType::Final {
                StateResponsible::Remove
            } else {
                StateResponsible::Keep
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn user(id: Uuid) -> User {
        let now = Utc::now();
        User {
            id,
            email: "user@example.com".into(),
            fullname: "Some User".into(),
            is_admin: false,
            is_disabled: false,
            locale: "en_US".into(),
            theme: "azure".into(),
            timezone: "UTC".into(),
            auth_failures: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn admin() -> Principal {
        Principal::new(Uuid::new_v4()).with_admin(true)
    }

    fn member() -> Principal {
        Principal::new(Uuid::new_v4())
    }

    #[test]
    fn delete_state_requires_admin_and_locked_template() {
        let voter = WorkflowVoter::new();
        let project = project();

        let unlocked = template(&project, false);
        let locked = template(&project, true);
        let s_unlocked = state(&unlocked, "New", StateType::Initial);
        let s_locked = state(&locked, "New", StateType::Initial);

        let on_unlocked = Subject::State { state: &s_unlocked, template: &unlocked };
        let on_locked = Subject::State { state: &s_locked, template: &locked };

        assert!(!voter.is_granted(Some(&member()), Action::DeleteState, &on_unlocked));
        assert!(!voter.is_granted(Some(&member()), Action::DeleteState, &on_locked));
        assert!(!voter.is_granted(Some(&admin()), Action::DeleteState, &on_unlocked));
        assert!(voter.is_granted(Some(&admin()), Action::DeleteState, &on_locked));
    }

    #[test]
    fn mismatched_subject_abstains() {
        let voter = WorkflowVoter::new();
        let project = project();
        assert!(!voter.is_granted(Some(&admin()), Action::DeleteState, &Subject::Project(&project)));
        assert!(!voter.is_granted(Some(&admin()), Action::CreateProject, &Subject::Project(&project)));
    }

    #[test]
    fn anonymous_and_disabled_are_denied() {
        let voter = WorkflowVoter::new();
        assert!(!voter.is_granted(None, Action::CreateProject, &Subject::None));

        let disabled = admin().with_disabled(true);
        assert!(!voter.is_granted(Some(&disabled), Action::CreateProject, &Subject::None));
        assert!(voter.is_granted(Some(&admin()), Action::CreateProject, &Subject::None));
    }

    #[test]
    fn project_suspension_toggles() {
        let voter = WorkflowVoter::new();
        let mut project = project();
        assert!(voter.is_granted(Some(&admin()), Action::SuspendProject, &Subject::Project(&project)));
        assert!(!voter.is_granted(Some(&admin()), Action::ResumeProject, &Subject::Project(&project)));

        project.is_suspended = true;
        assert!(!voter.is_granted(Some(&admin()), Action::SuspendProject, &Subject::Project(&project)));
        assert!(voter.is_granted(Some(&admin()), Action::ResumeProject, &Subject::Project(&project)));
    }

    #[test]
    fn unlock_needs_an_initial_state() {
        let voter = WorkflowVoter::new();
        let project = project();
        let locked = template(&project, true);

        let without = Subject::Template(TemplateSubject::new(&locked));
        let with = Subject::Template(TemplateSubject::new(&locked).with_initial_state(true));
        assert!(!voter.is_granted(Some(&admin()), Action::UnlockTemplate, &without));
        assert!(voter.is_granted(Some(&admin()), Action::UnlockTemplate, &with));
        assert!(!voter.is_granted(Some(&admin()), Action::LockTemplate, &with));
    }

    #[test]
    fn final_states_refuse_transition_management() {
        let voter = WorkflowVoter::new();
        let project = project();
        let locked = template(&project, true);
        let closed = state(&locked, "Closed", StateType::Final);
        let open = state(&locked, "Open", StateType::Intermediate);

        let on_closed = Subject::State { state: &closed, template: &locked };
        let on_open = Subject::State { state: &open, template: &locked };
        assert!(!voter.is_granted(Some(&admin()), Action::ManageTransitions, &on_closed));
        assert!(voter.is_granted(Some(&admin()), Action::ManageTransitions, &on_open));
        // Responsible groups only make sense for assign states.
        assert!(!voter.is_granted(Some(&admin()), Action::ManageResponsibleGroups, &on_open));
    }

    #[test]
    fn list_items_only_on_list_fields() {
        let voter = WorkflowVoter::new();
        let project = project();
        let locked = template(&project, true);
        let s = state(&locked, "Open", StateType::Initial);
        let now = Utc::now();
        let mut field = Field {
            id: Uuid::new_v4(),
            state_id: s.id,
            name: "Priority".into(),
            field_type: FieldType::Number,
            description: None,
            is_required: false,
            parameters: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        let granted = |field: &Field| {
            voter.is_granted(Some(&admin()), Action::CreateListItem, &Subject::Field { field, template: &locked })
        };
        assert!(!granted(&field));
        field.field_type = FieldType::List;
        assert!(granted(&field));
    }

    #[test]
    fn users_manage_themselves_but_not_their_removal() {
        let voter = WorkflowVoter::new();
        let me = member();
        let myself = user(me.user_id);
        let other = user(Uuid::new_v4());

        assert!(voter.is_granted(Some(&me), Action::UpdateUser, &Subject::User(&myself)));
        assert!(voter.is_granted(Some(&me), Action::SetPassword, &Subject::User(&myself)));
        assert!(!voter.is_granted(Some(&me), Action::UpdateUser, &Subject::User(&other)));

        let root = admin();
        let root_user = user(root.user_id);
        assert!(!voter.is_granted(Some(&root), Action::DeleteUser, &Subject::User(&root_user)));
        assert!(!voter.is_granted(Some(&root), Action::DisableUser, &Subject::User(&root_user)));
        assert!(voter.is_granted(Some(&root), Action::DisableUser, &Subject::User(&other)));
        assert!(!voter.is_granted(Some(&root), Action::UnlockUser, &Subject::User(&other)));

        let mut locked_out = user(Uuid::new_v4());
        locked_out.locked_until = Some(Utc::now() + Duration::minutes(5));
        assert!(voter.is_granted(Some(&root), Action::UnlockUser, &Subject::User(&locked_out)));
    }

    #[test]
    fn view_template_follows_grants() {
        let voter = WorkflowVoter::new();
        let project = project();
        let t = template(&project, false);
        let group = Uuid::new_v4();
        let table = PermissionTable::from_grants([(TemplatePermission::ViewIssues, Grantee::Group(group))]);

        let subject = Subject::Template(TemplateSubject::new(&t).with_permissions(&table));
        assert!(!voter.is_granted(Some(&member()), Action::ViewTemplate, &subject));
        assert!(voter.is_granted(Some(&member().with_groups([group])), Action::ViewTemplate, &subject));
        assert!(voter.is_granted(Some(&admin()), Action::ViewTemplate, &subject));
    }

    #[test]
    fn transitions_have_no_admin_bypass() {
        let voter = WorkflowVoter::new();
        let mut project = project();
        let t = template(&project, false);
        let submitted = state(&t, "Submitted", StateType::Initial);
        let assigned = state(&t, "Assigned", StateType::Intermediate);

        let mut graph = TransitionGraph::new();
        graph.set_role_transitions(&submitted, &assigned, [SystemRole::Author]).unwrap();

        let granted = |principal: &Principal, project: &Project, roles: &[SystemRole]| {
            let subject = Subject::Transition(TransitionSubject {
                project,
                template: &t,
                from: &submitted,
                to: &assigned,
                graph: &graph,
                roles,
            });
            voter.is_granted(Some(principal), Action::ExecuteTransition, &subject)
        };

        assert!(!granted(&admin(), &project, &[]));
        assert!(granted(&member(), &project, &[SystemRole::Author]));

        project.is_suspended = true;
        assert!(!granted(&member(), &project, &[SystemRole::Author]));
    }
}
