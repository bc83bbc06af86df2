use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes::{auth, fields, groups, health, projects, states, templates, users, workflow};

#[derive(OpenApi)]
#[openapi(
	paths(
		auth::login,
		auth::me,
		health::health,
		projects::list_projects,
		projects::create_project,
		projects::get_project,
		projects::update_project,
		projects::delete_project,
		projects::suspend_project,
		projects::resume_project,
		templates::list_templates,
		templates::create_template,
		templates::get_template,
		templates::update_template,
		templates::delete_template,
		templates::lock_template,
		templates::unlock_template,
		templates::get_permissions,
		templates::set_permission,
		states::list_states,
		states::create_state,
		states::get_state,
		states::update_state,
		states::delete_state,
		states::set_initial_state,
		states::get_transitions,
		states::set_transition,
		states::get_responsible_groups,
		states::set_responsible_groups,
		fields::list_fields,
		fields::create_field,
		fields::get_field,
		fields::update_field,
		fields::delete_field,
		fields::get_permissions,
		fields::set_permission,
		fields::get_access,
		fields::list_items,
		fields::create_item,
		fields::update_item,
		fields::delete_item,
		groups::list_groups,
		groups::create_group,
		groups::get_group,
		groups::update_group,
		groups::delete_group,
		groups::get_members,
		groups::set_members,
		users::list_users,
		users::create_user,
		users::get_user,
		users::update_user,
		users::delete_user,
		users::disable_user,
		users::enable_user,
		users::unlock_user,
		users::set_password,
		workflow::dry_run_transition,
		workflow::allowed_transitions
	),
	components(
		schemas(
			health::HealthResponse,
			models::dictionary::StateType,
			models::dictionary::StateResponsible,
			models::dictionary::FieldType,
			models::dictionary::SystemRole,
			models::dictionary::FieldPermission,
			models::dictionary::TemplatePermission,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::UserCreateRequest,
			models::user::UserUpdateRequest,
			models::user::SetPasswordRequest,
			models::project::Project,
			models::project::ProjectCreateRequest,
			models::project::ProjectUpdateRequest,
			models::template::Template,
			models::template::TemplateCreateRequest,
			models::template::TemplateUpdateRequest,
			models::template::TemplatePermissionGrants,
			models::template::SetTemplatePermissionRequest,
			models::state::State,
			models::state::StateCreateRequest,
			models::state::StateUpdateRequest,
			models::state::TransitionGrants,
			models::state::SetTransitionRequest,
			models::state::SetResponsibleGroupsRequest,
			models::field::Field,
			models::field::FieldCreateRequest,
			models::field::FieldUpdateRequest,
			models::field::FieldPermissionGrants,
			models::field::FieldAccess,
			models::field::SetFieldPermissionRequest,
			models::field::ListItem,
			models::field::ListItemCreateRequest,
			models::field::ListItemUpdateRequest,
			models::group::Group,
			models::group::GroupCreateRequest,
			models::group::GroupUpdateRequest,
			models::group::Membership,
			models::group::SetMembersRequest,
			workflow::TransitionRequest,
			workflow::TransitionOutcome
		)
	),
	tags(
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Health", description = "Liveness and database check"),
		(name = "Projects", description = "Project management"),
		(name = "Templates", description = "Issue templates and their permissions"),
		(name = "States", description = "Workflow states, transitions and responsible groups"),
		(name = "Fields", description = "State fields, field permissions and list items"),
		(name = "Groups", description = "Global and project groups"),
		(name = "Users", description = "Accounts"),
		(name = "Workflow", description = "Transition evaluation")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	normalize_path_operations(&mut doc);
	ensure_security_components(&mut doc);
	ensure_root_entry(&mut doc, "security", json!([{ "bearerAuth": [] }]));
	ensure_root_entry(&mut doc, "openapi", json!("3.1.0"));
	add_examples(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

/// Serves the document at `/api-docs/openapi.json` and Swagger UI at `/docs`.
pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn normalize_path_operations(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		let snapshot = paths.clone();
		for (path, item) in snapshot {
			if let Some(ops) = item.as_object() {
				let mut normalized = Map::new();
				for (method, val) in ops {
					let key = method.to_lowercase();
					if let Some(existing) = normalized.get_mut(&key) {
						merge_values(existing, val);
					} else {
						normalized.insert(key, val.clone());
					}
				}
				paths.insert(path, Value::Object(normalized));
			}
		}
	}
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else { return; };
	let Some(components) = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
	else {
		return;
	};
	let Some(schemes) = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
	else {
		return;
	};

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn ensure_root_entry(doc: &mut Value, key: &str, value: Value) {
	if let Some(root) = doc.as_object_mut() {
		root.entry(key).or_insert(value);
	}
}

fn add_examples(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		for item in paths.values_mut() {
			if let Some(operations) = item.as_object_mut() {
				for operation in operations.values_mut() {
					apply_request_examples(operation);
				}
			}
		}
	}
}

fn apply_request_examples(operation: &mut Value) {
	let Some(request_body) = operation.get_mut("requestBody") else { return; };
	let Some(content) = request_body.get_mut("content").and_then(Value::as_object_mut) else { return; };
	let Some(app_json) = content.get_mut("application/json").and_then(Value::as_object_mut) else { return; };
	let Some(schema) = app_json.get("schema").and_then(Value::as_object) else { return; };
	let Some(reference) = schema.get("$ref").and_then(Value::as_str) else { return; };

	let example = match reference {
		"#/components/schemas/LoginRequest" => Some(json!({
			"email": "ada@example.com",
			"password": "S3cureP@ssw0rd"
		})),
		"#/components/schemas/SetTemplatePermissionRequest" => Some(json!({
			"permission": "issue.view",
			"roles": ["author", "responsible"],
			"groups": ["00000000-0000-0000-0000-000000000000"]
		})),
		"#/components/schemas/SetTransitionRequest" => Some(json!({
			"to_state_id": "00000000-0000-0000-0000-000000000000",
			"roles": ["responsible"]
		})),
		"#/components/schemas/FieldCreateRequest" => Some(json!({
			"state_id": "00000000-0000-0000-0000-000000000000",
			"name": "Estimate",
			"type": "duration",
			"is_required": false,
			"parameters": { "minimum": "0:00", "maximum": "40:00", "default": "1:30" }
		})),
		"#/components/schemas/TransitionRequest" => Some(json!({
			"from_state_id": "00000000-0000-0000-0000-000000000000",
			"to_state_id": "11111111-1111-1111-1111-111111111111",
			"roles": ["author"],
			"responsible": "22222222-2222-2222-2222-222222222222"
		})),
		_ => None,
	};

	if let Some(example) = example {
		app_json.insert("example".to_string(), example);
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

fn merge_values(target: &mut Value, addition: &Value) {
	match (target, addition) {
		(Value::Object(dest), Value::Object(src)) => {
			for (key, value) in src {
				if let Some(existing) = dest.get_mut(key) {
					merge_values(existing, value);
				} else {
					dest.insert(key.clone(), value.clone());
				}
			}
		}
		(Value::Array(dest), Value::Array(src)) => {
			for item in src {
				if !dest.contains(item) {
					dest.push(item.clone());
				}
			}
		}
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn document_lists_workflow_paths_and_bearer_scheme() {
		let doc = serde_json::to_value(build_openapi(8000).unwrap()).unwrap();
		assert!(doc.pointer("/paths/~1api~1workflow~1transition/post").is_some());
		assert!(doc.pointer("/paths/~1api~1states~1{id}~1transitions/put").is_some());
		assert!(doc.pointer("/components/securitySchemes/bearerAuth").is_some());
		assert_eq!(doc.pointer("/servers/0/url").and_then(Value::as_str), Some("http://localhost:8000"));
	}
}
