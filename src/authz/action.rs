use std::fmt;

use crate::models::field::{Field, ListItem};
use crate::models::group::Group;
use crate::models::project::Project;
use crate::models::state::State;
use crate::models::template::Template;
use crate::models::user::User;
use crate::models::dictionary::{SystemRole, TemplatePermission};
use crate::workflow::{PermissionTable, TransitionGraph};

/// Runtime tag of a [`Subject`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    None,
    Project,
    Template,
    State,
    Field,
    ListItem,
    Group,
    User,
    Transition,
}

/// Every command the voter can rule on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateProject,
    UpdateProject,
    DeleteProject,
    SuspendProject,
    ResumeProject,
    CreateTemplate,
    ViewTemplate,
    UpdateTemplate,
    DeleteTemplate,
    LockTemplate,
    UnlockTemplate,
    ManageTemplatePermissions,
    CreateState,
    UpdateState,
    DeleteState,
    SetInitialState,
    ManageTransitions,
    ManageResponsibleGroups,
    CreateField,
    UpdateField,
    DeleteField,
    ManageFieldPermissions,
    CreateListItem,
    UpdateListItem,
    DeleteListItem,
    CreateGroup,
    UpdateGroup,
    DeleteGroup,
    ManageGroupMembers,
    CreateUser,
    UpdateUser,
    DeleteUser,
    DisableUser,
    EnableUser,
    UnlockUser,
    SetPassword,
    ExecuteTransition,
}

impl Action {
    /// Subject variant each action is registered for.
    pub const fn subject_kind(self) -> SubjectKind {
        use Action::*;
        match self {
            CreateProject | CreateGroup | CreateUser => SubjectKind::None,
            UpdateProject | DeleteProject | SuspendProject | ResumeProject | CreateTemplate => {
                SubjectKind::Project
            }
            ViewTemplate | UpdateTemplate | DeleteTemplate | LockTemplate | UnlockTemplate
            | ManageTemplatePermissions | CreateState => SubjectKind::Template,
            UpdateState | DeleteState | SetInitialState | ManageTransitions
            | ManageResponsibleGroups | CreateField => SubjectKind::State,
            UpdateField | DeleteField | ManageFieldPermissions | CreateListItem => SubjectKind::Field,
            UpdateListItem | DeleteListItem => SubjectKind::ListItem,
            UpdateGroup | DeleteGroup | ManageGroupMembers => SubjectKind::Group,
            UpdateUser | DeleteUser | DisableUser | EnableUser | UnlockUser | SetPassword => {
                SubjectKind::User
            }
            ExecuteTransition => SubjectKind::Transition,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Template plus the facts template rules depend on.
#[derive(Debug, Clone, Copy)]
pub struct TemplateSubject<'a> {
    pub template: &'a Template,
    pub has_initial_state: bool,
    pub permissions: Option<&'a PermissionTable<TemplatePermission>>,
}

impl<'a> TemplateSubject<'a> {
    pub fn new(template: &'a Template) -> Self {
        Self {
            template,
            has_initial_state: false,
            permissions: None,
        }
    }

    pub fn with_initial_state(mut self, has_initial_state: bool) -> Self {
        self.has_initial_state = has_initial_state;
        self
    }

    pub fn with_permissions(mut self, permissions: &'a PermissionTable<TemplatePermission>) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// An attempt to move an issue from one state to another.
#[derive(Debug, Clone, Copy)]
pub struct TransitionSubject<'a> {
    pub project: &'a Project,
    pub template: &'a Template,
    pub from: &'a State,
    pub to: &'a State,
    pub graph: &'a TransitionGraph,
    /// Issue roles held by the principal (author, responsible).
    pub roles: &'a [SystemRole],
}

#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    None,
    Project(&'a Project),
    Template(TemplateSubject<'a>),
    State { state: &'a State, template: &'a Template },
    Field { field: &'a Field, template: &'a Template },
    ListItem { item: &'a ListItem, field: &'a Field, template: &'a Template },
    Group(&'a Group),
    User(&'a User),
    Transition(TransitionSubject<'a>),
}

impl Subject<'_> {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::None => SubjectKind::None,
            Subject::Project(_) => SubjectKind::Project,
            Subject::Template(_) => SubjectKind::Template,
            Subject::State { .. } => SubjectKind::State,
            Subject::Field { .. } => SubjectKind::Field,
            Subject::ListItem { .. } => SubjectKind::ListItem,
            Subject::Group(_) => SubjectKind::Group,
            Subject::User(_) => SubjectKind::User,
            Subject::Transition(_) => SubjectKind::Transition,
        }
    }
}
