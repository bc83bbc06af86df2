//! State transition graph of a template.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::dictionary::{StateType, SystemRole};
use crate::models::state::State;
use crate::workflow::grants::{GrantDiff, Grantee, GranteeContext};

#[derive(Debug, Clone, Copy)]
struct Node {
    template_id: Uuid,
    state_type: StateType,
}

/// Directed edges between states, each gated by a set of grantees.
#[derive(Debug, Clone, Default)]
pub struct TransitionGraph {
    nodes: HashMap<Uuid, Node>,
    edges: BTreeMap<(Uuid, Uuid), BTreeSet<Grantee>>,
}

/// Rejects edges that would break the graph invariants.
pub fn check_edge(from: &State, to: &State) -> AppResult<()> {
    if from.template_id != to.template_id {
        return Err(AppError::cross_template(format!(
            "state '{}' and state '{}' belong to different templates",
            from.name, to.name
        )));
    }
    if from.is_final() {
        return Err(AppError::conflict(format!(
            "final state '{}' cannot have outgoing transitions",
            from.name
        )));
    }
    if from.id == to.id {
        return Err(AppError::bad_request("a state cannot transition to itself"));
    }
    Ok(())
}

impl TransitionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from persisted states and edges. Edges that reference
    /// unknown states or violate an invariant are skipped.
    pub fn from_parts<'a>(
        states: impl IntoIterator<Item = &'a State>,
        edges: impl IntoIterator<Item = (Uuid, Uuid, Grantee)>,
    ) -> Self {
        let mut graph = Self::new();
        for state in states {
            graph.add_state(state);
        }
        for (from, to, grantee) in edges {
            match (graph.nodes.get(&from), graph.nodes.get(&to)) {
                (Some(f), Some(t)) if f.template_id == t.template_id && !f.state_type.is_final() && from != to => {
                    graph.edges.entry((from, to)).or_default().insert(grantee);
                }
                _ => {
                    tracing::warn!(%from, %to, "skipping invalid transition edge");
                }
            }
        }
        graph
    }

    pub fn add_state(&mut self, state: &State) {
        self.nodes.insert(
            state.id,
            Node {
                template_id: state.template_id,
                state_type: state.state_type,
            },
        );
    }

    pub fn roles(&self, from: Uuid, to: Uuid) -> BTreeSet<SystemRole> {
        self.edge(from, to)
            .filter_map(|g| match g {
                Grantee::Role(role) => Some(*role),
                Grantee::Group(_) => None,
            })
            .collect()
    }

    pub fn groups(&self, from: Uuid, to: Uuid) -> BTreeSet<Uuid> {
        self.edge(from, to)
            .filter_map(|g| match g {
                Grantee::Group(id) => Some(*id),
                Grantee::Role(_) => None,
            })
            .collect()
    }

    fn edge(&self, from: Uuid, to: Uuid) -> impl Iterator<Item = &Grantee> {
        self.edges.get(&(from, to)).into_iter().flatten()
    }

    /// Target states of every edge leaving `from`, regardless of grantees.
    pub fn targets(&self, from: Uuid) -> BTreeSet<Uuid> {
        self.edges
            .range((from, Uuid::nil())..=(from, Uuid::from_u128(u128::MAX)))
            .map(|((_, to), _)| *to)
            .collect()
    }

    /// Replaces the role grantees of the edge `from -> to`.
    pub fn set_role_transitions(
        &mut self,
        from: &State,
        to: &State,
        roles: impl IntoIterator<Item = SystemRole>,
    ) -> AppResult<GrantDiff<SystemRole>> {
        check_edge(from, to)?;
        self.add_state(from);
        self.add_state(to);

        let requested: BTreeSet<SystemRole> = roles.into_iter().collect();
        let diff = GrantDiff::between(&self.roles(from.id, to.id), &requested);
        self.apply((from.id, to.id), &diff.removed, &diff.added, |r| Grantee::Role(*r));
        Ok(diff)
    }

    /// Replaces the group grantees of the edge `from -> to`. Ids outside
    /// `known_groups` are dropped without error.
    pub fn set_group_transitions(
        &mut self,
        from: &State,
        to: &State,
        groups: impl IntoIterator<Item = Uuid>,
        known_groups: &HashSet<Uuid>,
    ) -> AppResult<GrantDiff<Uuid>> {
        check_edge(from, to)?;
        self.add_state(from);
        self.add_state(to);

        let requested: BTreeSet<Uuid> = groups
            .into_iter()
            .filter(|id| known_groups.contains(id))
            .collect();
        let diff = GrantDiff::between(&self.groups(from.id, to.id), &requested);
        self.apply((from.id, to.id), &diff.removed, &diff.added, |g| Grantee::Group(*g));
        Ok(diff)
    }

    fn apply<T>(&mut self, key: (Uuid, Uuid), removed: &[T], added: &[T], to_grantee: impl Fn(&T) -> Grantee) {
        let set = self.edges.entry(key).or_default();
        for item in removed {
            set.remove(&to_grantee(item));
        }
        for item in added {
            set.insert(to_grantee(item));
        }
        if set.is_empty() {
            self.edges.remove(&key);
        }
    }

    /// States reachable from `from` through an edge whose grantees intersect
    /// `ctx`. Admins get no bypass here.
    pub fn allowed_transitions(&self, from: &State, ctx: &GranteeContext) -> BTreeSet<Uuid> {
        if from.is_final() {
            return BTreeSet::new();
        }
        self.edges
            .range((from.id, Uuid::nil())..=(from.id, Uuid::from_u128(u128::MAX)))
            .filter(|(_, grantees)| ctx.matches_any(grantees.iter()))
            .map(|((_, to), _)| *to)
            .collect()
    }
}
