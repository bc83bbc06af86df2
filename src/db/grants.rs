//! Persistence of grant sets and transition edges.
//!
//! Writers follow one pattern: load the current rows, let the workflow core
//! compute the diff, delete removed rows, insert added rows. Callers pass an
//! open transaction and commit it, so readers see either the old set or the
//! new one.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;
use std::str::FromStr;

use sqlx::SqliteConnection;
use uuid::Uuid;

use super::repository::{list_states, parse_uuid, visible_group_ids};
use crate::errors::{AppError, AppResult};
use crate::models::dictionary::{FieldPermission, SystemRole, TemplatePermission};
use crate::models::state::State;
use crate::workflow::{GrantDiff, Grantee, PermissionTable, TransitionGraph};

/// Join tables holding the grants of one kind of owner.
struct GrantTables {
    roles: &'static str,
    groups: &'static str,
    owner: &'static str,
}

const TEMPLATE_GRANTS: GrantTables = GrantTables {
    roles: "template_role_permissions",
    groups: "template_group_permissions",
    owner: "template_id",
};

const FIELD_GRANTS: GrantTables = GrantTables {
    roles: "field_role_permissions",
    groups: "field_group_permissions",
    owner: "field_id",
};

fn parse_code<T: FromStr>(s: &str) -> AppResult<T> {
    s.parse()
        .map_err(|_| AppError::internal(format!("invalid stored code '{}'", s)))
}

async fn load_table<P>(conn: &mut SqliteConnection, tables: &GrantTables, owner_id: Uuid) -> AppResult<PermissionTable<P>>
where
    P: FromStr + Copy + Ord,
{
    let role_rows: Vec<(String, String)> = sqlx::query_as(&format!(
        "SELECT permission, role FROM {} WHERE {} = ?",
        tables.roles, tables.owner
    ))
    .bind(owner_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let group_rows: Vec<(String, String)> = sqlx::query_as(&format!(
        "SELECT permission, group_id FROM {} WHERE {} = ?",
        tables.groups, tables.owner
    ))
    .bind(owner_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut grants = Vec::with_capacity(role_rows.len() + group_rows.len());
    for (permission, role) in &role_rows {
        grants.push((parse_code::<P>(permission)?, Grantee::Role(parse_code(role)?)));
    }
    for (permission, group) in &group_rows {
        grants.push((parse_code::<P>(permission)?, Grantee::Group(parse_uuid(group)?)));
    }
    Ok(PermissionTable::from_grants(grants))
}

async fn write_role_diff(
    conn: &mut SqliteConnection,
    tables: &GrantTables,
    owner_id: Uuid,
    permission: &str,
    diff: &GrantDiff<SystemRole>,
) -> AppResult<()> {
    for role in &diff.removed {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = ? AND role = ? AND permission = ?",
            tables.roles, tables.owner
        ))
        .bind(owner_id.to_string())
        .bind(role.as_str())
        .bind(permission)
        .execute(&mut *conn)
        .await?;
    }
    for role in &diff.added {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, role, permission) VALUES (?, ?, ?)",
            tables.roles, tables.owner
        ))
        .bind(owner_id.to_string())
        .bind(role.as_str())
        .bind(permission)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn write_group_diff(
    conn: &mut SqliteConnection,
    tables: &GrantTables,
    owner_id: Uuid,
    permission: &str,
    diff: &GrantDiff<Uuid>,
) -> AppResult<()> {
    for group in &diff.removed {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = ? AND group_id = ? AND permission = ?",
            tables.groups, tables.owner
        ))
        .bind(owner_id.to_string())
        .bind(group.to_string())
        .bind(permission)
        .execute(&mut *conn)
        .await?;
    }
    for group in &diff.added {
        sqlx::query(&format!(
            "INSERT INTO {} ({}, group_id, permission) VALUES (?, ?, ?)",
            tables.groups, tables.owner
        ))
        .bind(owner_id.to_string())
        .bind(group.to_string())
        .bind(permission)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn set_roles<P>(
    conn: &mut SqliteConnection,
    tables: &GrantTables,
    owner_id: Uuid,
    permission: P,
    roles: impl IntoIterator<Item = SystemRole>,
) -> AppResult<GrantDiff<SystemRole>>
where
    P: FromStr + Copy + Ord + Display,
{
    let mut table = load_table::<P>(conn, tables, owner_id).await?;
    let diff = table.set_roles_permission(permission, roles);
    write_role_diff(conn, tables, owner_id, &permission.to_string(), &diff).await?;
    Ok(diff)
}

async fn set_groups<P>(
    conn: &mut SqliteConnection,
    tables: &GrantTables,
    owner_id: Uuid,
    project_id: Uuid,
    permission: P,
    groups: impl IntoIterator<Item = Uuid>,
) -> AppResult<GrantDiff<Uuid>>
where
    P: FromStr + Copy + Ord + Display,
{
    let known = visible_group_ids(conn, project_id).await?;
    let mut table = load_table::<P>(conn, tables, owner_id).await?;
    let diff = table.set_groups_permission(permission, groups, &known);
    write_group_diff(conn, tables, owner_id, &permission.to_string(), &diff).await?;
    Ok(diff)
}

pub async fn load_template_permissions(
    conn: &mut SqliteConnection,
    template_id: Uuid,
) -> AppResult<PermissionTable<TemplatePermission>> {
    load_table(conn, &TEMPLATE_GRANTS, template_id).await
}

pub async fn set_template_roles(
    conn: &mut SqliteConnection,
    template_id: Uuid,
    permission: TemplatePermission,
    roles: impl IntoIterator<Item = SystemRole>,
) -> AppResult<GrantDiff<SystemRole>> {
    set_roles(conn, &TEMPLATE_GRANTS, template_id, permission, roles).await
}

/// Groups outside the template's project (and not global) are ignored.
pub async fn set_template_groups(
    conn: &mut SqliteConnection,
    template_id: Uuid,
    project_id: Uuid,
    permission: TemplatePermission,
    groups: impl IntoIterator<Item = Uuid>,
) -> AppResult<GrantDiff<Uuid>> {
    set_groups(conn, &TEMPLATE_GRANTS, template_id, project_id, permission, groups).await
}

pub async fn load_field_permissions(
    conn: &mut SqliteConnection,
    field_id: Uuid,
) -> AppResult<PermissionTable<FieldPermission>> {
    load_table(conn, &FIELD_GRANTS, field_id).await
}

pub async fn set_field_roles(
    conn: &mut SqliteConnection,
    field_id: Uuid,
    permission: FieldPermission,
    roles: impl IntoIterator<Item = SystemRole>,
) -> AppResult<GrantDiff<SystemRole>> {
    set_roles(conn, &FIELD_GRANTS, field_id, permission, roles).await
}

pub async fn set_field_groups(
    conn: &mut SqliteConnection,
    field_id: Uuid,
    project_id: Uuid,
    permission: FieldPermission,
    groups: impl IntoIterator<Item = Uuid>,
) -> AppResult<GrantDiff<Uuid>> {
    set_groups(conn, &FIELD_GRANTS, field_id, project_id, permission, groups).await
}

/// States of a template and every edge between them.
pub async fn load_transition_graph(
    conn: &mut SqliteConnection,
    template_id: Uuid,
) -> AppResult<(Vec<State>, TransitionGraph)> {
    let states = list_states(conn, template_id).await?;

    let role_rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT t.from_state_id, t.to_state_id, t.role FROM state_role_transitions t \
         JOIN states s ON s.id = t.from_state_id WHERE s.template_id = ?",
    )
    .bind(template_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let group_rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT t.from_state_id, t.to_state_id, t.group_id FROM state_group_transitions t \
         JOIN states s ON s.id = t.from_state_id WHERE s.template_id = ?",
    )
    .bind(template_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut edges = Vec::with_capacity(role_rows.len() + group_rows.len());
    for (from, to, role) in &role_rows {
        edges.push((parse_uuid(from)?, parse_uuid(to)?, Grantee::Role(parse_code(role)?)));
    }
    for (from, to, group) in &group_rows {
        edges.push((parse_uuid(from)?, parse_uuid(to)?, Grantee::Group(parse_uuid(group)?)));
    }

    let graph = TransitionGraph::from_parts(states.iter(), edges);
    Ok((states, graph))
}

pub async fn set_role_transitions(
    conn: &mut SqliteConnection,
    from: &State,
    to: &State,
    roles: impl IntoIterator<Item = SystemRole>,
) -> AppResult<GrantDiff<SystemRole>> {
    let (_, mut graph) = load_transition_graph(conn, from.template_id).await?;
    let diff = graph.set_role_transitions(from, to, roles)?;

    for role in &diff.removed {
        sqlx::query("DELETE FROM state_role_transitions WHERE from_state_id = ? AND to_state_id = ? AND role = ?")
            .bind(from.id.to_string())
            .bind(to.id.to_string())
            .bind(role.as_str())
            .execute(&mut *conn)
            .await?;
    }
    for role in &diff.added {
        sqlx::query("INSERT INTO state_role_transitions (from_state_id, to_state_id, role) VALUES (?, ?, ?)")
            .bind(from.id.to_string())
            .bind(to.id.to_string())
            .bind(role.as_str())
            .execute(&mut *conn)
            .await?;
    }
    Ok(diff)
}

pub async fn set_group_transitions(
    conn: &mut SqliteConnection,
    from: &State,
    to: &State,
    project_id: Uuid,
    groups: impl IntoIterator<Item = Uuid>,
) -> AppResult<GrantDiff<Uuid>> {
    let known = visible_group_ids(conn, project_id).await?;
    let (_, mut graph) = load_transition_graph(conn, from.template_id).await?;
    let diff = graph.set_group_transitions(from, to, groups, &known)?;

    for group in &diff.removed {
        sqlx::query("DELETE FROM state_group_transitions WHERE from_state_id = ? AND to_state_id = ? AND group_id = ?")
            .bind(from.id.to_string())
            .bind(to.id.to_string())
            .bind(group.to_string())
            .execute(&mut *conn)
            .await?;
    }
    for group in &diff.added {
        sqlx::query("INSERT INTO state_group_transitions (from_state_id, to_state_id, group_id) VALUES (?, ?, ?)")
            .bind(from.id.to_string())
            .bind(to.id.to_string())
            .bind(group.to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(diff)
}

pub async fn load_responsible_groups(conn: &mut SqliteConnection, state_id: Uuid) -> AppResult<BTreeSet<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT group_id FROM state_responsible_groups WHERE state_id = ?")
        .bind(state_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    ids.iter().map(|s| parse_uuid(s)).collect()
}

pub async fn set_responsible_groups(
    conn: &mut SqliteConnection,
    state_id: Uuid,
    project_id: Uuid,
    groups: impl IntoIterator<Item = Uuid>,
) -> AppResult<GrantDiff<Uuid>> {
    let known = visible_group_ids(conn, project_id).await?;
    let existing = load_responsible_groups(conn, state_id).await?;
    let requested: BTreeSet<Uuid> = groups.into_iter().filter(|g| known.contains(g)).collect();
    let diff = GrantDiff::between(&existing, &requested);

    for group in &diff.removed {
        sqlx::query("DELETE FROM state_responsible_groups WHERE state_id = ? AND group_id = ?")
            .bind(state_id.to_string())
            .bind(group.to_string())
            .execute(&mut *conn)
            .await?;
    }
    for group in &diff.added {
        sqlx::query("INSERT INTO state_responsible_groups (state_id, group_id) VALUES (?, ?)")
            .bind(state_id.to_string())
            .bind(group.to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(diff)
}

/// Replaces the members of a group. Unknown user ids are ignored.
pub async fn set_members(
    conn: &mut SqliteConnection,
    group_id: Uuid,
    users: impl IntoIterator<Item = Uuid>,
    known_users: &HashSet<Uuid>,
) -> AppResult<GrantDiff<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT user_id FROM membership WHERE group_id = ?")
        .bind(group_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    let existing = ids.iter().map(|s| parse_uuid(s)).collect::<AppResult<BTreeSet<Uuid>>>()?;
    let requested: BTreeSet<Uuid> = users.into_iter().filter(|u| known_users.contains(u)).collect();
    let diff = GrantDiff::between(&existing, &requested);

    for user in &diff.removed {
        sqlx::query("DELETE FROM membership WHERE group_id = ? AND user_id = ?")
            .bind(group_id.to_string())
            .bind(user.to_string())
            .execute(&mut *conn)
            .await?;
    }
    for user in &diff.added {
        sqlx::query("INSERT INTO membership (group_id, user_id) VALUES (?, ?)")
            .bind(group_id.to_string())
            .bind(user.to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(diff)
}
