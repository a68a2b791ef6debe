//! The introspected surface of a small but realistic model tree: a Group
//! root carrying the auth feature, Users under it, recursive Tasks under
//! them.

use db::auth::{self, PasswordResetToken};
use db::schema::{HandlerBuilder, IndexMode, ModelRegistry, ModelSpec, Reply};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use server::Config;
use server::introspect::{Verb, introspect};
use server::openapi;

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct GroupPatch {
    name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct UserModel {
    name: String,
    tasks: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct Task {
    name: String,
    description: Option<String>,
}

fn registry() -> ModelRegistry {
    let group = auth::register_auth(
        ModelSpec::builder("Group")
            .feature("IsMembered")
            .schema_of::<GroupPatch>()
            .child("users", "User", IndexMode::BySlug)
            .handler(
                HandlerBuilder::new("index")
                    .produces("OkResult")
                    .describe("The group's landing data")
                    .call(|_| async { Ok(Reply::Empty) }),
            )
            .handler(
                HandlerBuilder::new("update")
                    .actor()
                    .consumes::<GroupPatch>()
                    .produces("OkResult")
                    .call(|_| async { Ok(Reply::Empty) }),
            ),
    )
    .build();

    let user = ModelSpec::builder("User")
        .feature("IsOwner")
        .sluger(&["name"])
        .exclude("password")
        .schema_of::<UserModel>()
        .child("tasks", "Task", IndexMode::BySlug)
        .handler(
            HandlerBuilder::new("index")
                .actor()
                .produces("OkResult")
                .call(|_| async { Ok(Reply::Empty) }),
        )
        .handler(HandlerBuilder::new("remove").call(|_| async { Ok(Reply::Empty) }))
        .build();

    let task = ModelSpec::builder("Task")
        .schema_of::<Task>()
        .child("tasks", "Task", IndexMode::BySlug)
        .handler(
            HandlerBuilder::new("index")
                .produces("OkResult")
                .call(|_| async { Ok(Reply::Empty) }),
        )
        .build();

    ModelRegistry::build(
        "Group",
        vec![group, user, task, PasswordResetToken::spec()],
    )
    .unwrap()
}

fn config() -> Config {
    Config {
        mongo_uri: "mongodb://localhost:27017".into(),
        mongo_db: "groups".into(),
        mongo_table: None,
        mongo_gridfs: false,
        jwt_secret: "secret".into(),
        mail_server: "localhost".into(),
        mail_port: 25,
        mail_sender: "noreply@example.com".into(),
        mail_args: None,
        debug: false,
        debug_notifications: true,
        server_name: None,
        oa_info: Some(json!({"title": "Groups", "version": "0.1.0"})),
        oa_server_description: None,
    }
}

#[test]
fn auth_feature_surfaces_on_the_root() {
    let table = introspect(&registry());
    let group = &table.types["Group"];

    let auth = &group.handlers["auth"];
    assert_eq!(auth.verb, Verb::Post);
    assert_eq!(auth.urls, vec!["/auth"]);
    assert_eq!(auth.consumes.as_deref(), Some("Auth"));
    assert_eq!(auth.produces, vec!["AuthToken"]);
    assert_eq!(auth.can_crash["Unauthorized"].code, 401);

    let forgot = &group.handlers["forgot_password"];
    assert_eq!(forgot.verb, Verb::Put);
    assert_eq!(forgot.urls, vec!["/forgot_password"]);
    assert_eq!(forgot.can_crash["AlreadyRequested"].code, 429);
    assert_eq!(forgot.can_crash["NotFound"].code, 404);
}

#[test]
fn reset_tokens_stay_out_of_the_route_graph() {
    let registry = registry();
    assert!(registry.get("PasswordResetToken").is_some());

    let table = introspect(&registry);
    assert!(!table.types.contains_key("PasswordResetToken"));
}

#[test]
fn every_routed_handler_has_a_template() {
    let table = introspect(&registry());
    for (type_name, entry) in &table.types {
        for (name, meta) in &entry.handlers {
            assert!(!meta.urls.is_empty(), "{type_name}/{name} lost its urls");
        }
    }
}

#[test]
fn openapi_covers_the_whole_surface() {
    let registry = registry();
    let table = introspect(&registry);
    let doc = openapi::document(&config(), &registry, &table);

    assert_eq!(doc["components"]["x-root"], json!("Group"));
    assert_eq!(doc["paths"]["/auth"]["post"]["operationId"], json!("Root/auth"));
    assert_eq!(
        doc["paths"]["/new/user"]["post"]["operationId"],
        json!("Root/create_user")
    );
    assert_eq!(
        doc["paths"]["/{User_Path}/new/task"]["post"]["operationId"],
        json!("User/create_task")
    );
    assert_eq!(
        doc["paths"]["/{User_Path}/"]["delete"]["operationId"],
        json!("User/remove")
    );
    assert!(doc["paths"]["/openapi"]["get"].is_object());

    assert_eq!(
        doc["components"]["schemas"]["Group"]["x-features"],
        json!(["Group", "IsMembered", "IsAuth"])
    );
    assert_eq!(
        doc["components"]["schemas"]["User"]["properties"]["tasks"]["x-model"],
        json!("Task")
    );
    assert!(doc["components"]["schemas"]["Auth"].is_object());
    assert!(doc["components"]["schemas"]["PasswordResetToken"].is_object());
}
