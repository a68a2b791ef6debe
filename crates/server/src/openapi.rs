//! OpenAPI 3 projection.
//!
//! A deterministic, pure projection of the introspection table: handler
//! routes become operations keyed `<Type>/<handler>` (or `Root/<handler>`
//! for the template-less root routes), factories get their canned response
//! tables, and the components carry every registered schema annotated with
//! `x-features`, child-list `x-model` markers, and the top-level `x-root`.

use std::collections::BTreeMap;

use schemars::schema_for;
use serde_json::{Map, Value, json};

use db::schema::ModelRegistry;
use utils::response::{ErrorMessage, Ok as OkBody, OkListResult, OkResult};
use utils::token::AuthToken;

use crate::config::Config;
use crate::introspect::{HandlerMeta, Introspection};

pub fn document(config: &Config, registry: &ModelRegistry, table: &Introspection) -> Value {
    let mut result = Map::new();
    result.insert("openapi".into(), json!("3.0.1"));

    if let Some(info) = &config.oa_info {
        result.insert("info".into(), info.clone());
    }
    if let (Some(server), Some(description)) = (&config.server_name, &config.oa_server_description)
    {
        result.insert(
            "servers".into(),
            json!([{"url": server, "description": description}]),
        );
    }

    let mut params: BTreeMap<String, Value> = BTreeMap::new();
    result.insert("paths".into(), paths(table, &mut params));
    result.insert("components".into(), components(registry, table, params));

    Value::Object(result)
}

fn paths(table: &Introspection, params: &mut BTreeMap<String, Value>) -> Value {
    let mut paths: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();

    own_path(&mut paths);

    for (type_name, entry) in &table.types {
        for (handler_name, meta) in &entry.handlers {
            for url in &meta.urls {
                if is_factory_url(url) {
                    continue;
                }
                let verb = meta.verb.to_string().to_lowercase();
                let op = operation(type_name, handler_name, meta, url, params);
                paths.entry(url.clone()).or_default().insert(verb, op);
            }
        }

        let is_root = *type_name == table.root;
        let mut bases = Vec::new();
        if is_root {
            bases.push("/".to_string());
        }
        if !is_root || entry.factories.contains(type_name) {
            bases.push(format!("/{{{type_name}_Path}}/"));
        }
        for factory in &entry.factories {
            let fact = factory.to_lowercase();
            for base in &bases {
                let path = format!("{base}new/{fact}");
                let op = factory_operation(type_name, &fact, factory, base, params);
                paths.entry(path).or_default().insert("post".to_string(), op);
            }
        }
    }

    let mut object = Map::new();
    for (path, verbs) in paths {
        let mut verb_map = Map::new();
        for (verb, op) in verbs {
            verb_map.insert(verb, op);
        }
        object.insert(path, Value::Object(verb_map));
    }
    Value::Object(object)
}

fn own_path(paths: &mut BTreeMap<String, BTreeMap<String, Value>>) {
    paths.entry("/openapi".to_string()).or_default().insert(
        "get".to_string(),
        json!({
            "responses": {
                "200": {
                    "description": "Returns the app's OpenAPI definition",
                    "content": {"application/json": {"schema": {"type": "object"}}}
                }
            }
        }),
    );
}

fn operation(
    type_name: &str,
    handler_name: &str,
    meta: &HandlerMeta,
    url: &str,
    params: &mut BTreeMap<String, Value>,
) -> Value {
    let mut op = Map::new();
    if is_templated(url) {
        op.insert("operationId".into(), json!(format!("{type_name}/{handler_name}")));
        op.insert("parameters".into(), json!([param_ref(type_name, params)]));
    } else {
        op.insert("operationId".into(), json!(format!("Root/{handler_name}")));
    }

    let mut responses = Map::new();
    if !meta.produces.is_empty() {
        let mut ok = Map::new();
        if let Some(description) = &meta.description {
            ok.insert("description".into(), json!(description));
        }
        ok.insert("content".into(), content_of_many(&meta.produces));
        responses.insert("200".into(), Value::Object(ok));
    }
    for crash in meta.can_crash.values() {
        let mut failure = Map::new();
        if !crash.description.is_empty() {
            failure.insert("description".into(), json!(crash.description));
        }
        failure.insert("content".into(), content_of(&crash.returns));
        responses.insert(crash.code.to_string(), Value::Object(failure));
    }
    if !responses.is_empty() {
        op.insert("responses".into(), Value::Object(responses));
    }

    if let Some(consumes) = &meta.consumes {
        op.insert("requestBody".into(), json!({"content": content_of(consumes)}));
    }

    Value::Object(op)
}

fn factory_operation(
    type_name: &str,
    fact: &str,
    factory_model: &str,
    base: &str,
    params: &mut BTreeMap<String, Value>,
) -> Value {
    let mut op = Map::new();
    if is_templated(base) {
        op.insert("operationId".into(), json!(format!("{type_name}/create_{fact}")));
        op.insert("parameters".into(), json!([param_ref(type_name, params)]));
    } else {
        op.insert("operationId".into(), json!(format!("Root/create_{fact}")));
    }
    op.insert("requestBody".into(), json!({"content": content_of(factory_model)}));
    op.insert(
        "responses".into(),
        json!({
            "200": {
                "description": format!("Returns the data of the new {fact}"),
                "content": content_of("OkResult"),
            },
            "400": {
                "description": format!("Returns the errors if the {fact} can't be created with the provided data"),
                "content": content_of("ErrorMessage"),
            },
            "401": {
                "description": format!("Returns Unauthorized if the actor is not allowed to perform the creation of the {fact}"),
                "content": content_of("ErrorMessage"),
            },
            "409": {
                "description": "Returns an error if there is already a model with the same url",
                "content": content_of("ErrorMessage"),
            },
        }),
    );
    Value::Object(op)
}

fn components(
    registry: &ModelRegistry,
    table: &Introspection,
    params: BTreeMap<String, Value>,
) -> Value {
    let mut schemas: BTreeMap<String, Value> = builtin_schemas();

    for spec in registry.iter() {
        let mut schema = serde_json::to_value(&spec.schema).unwrap_or_else(|_| json!({}));
        if !schema.is_object() {
            schema = json!({});
        }

        let mut features = vec![json!(spec.name)];
        features.extend(spec.features.iter().map(|feature| json!(feature)));
        schema["x-features"] = Value::Array(features);

        if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
            for child_field in &spec.child_fields {
                if let Some(property) = properties.get_mut(&child_field.field) {
                    property["x-model"] = json!(child_field.child_type);
                }
            }
        }

        schemas.insert(spec.name.clone(), schema);

        for handler in spec.handlers.values() {
            if let Some(consume) = &handler.consumes {
                schemas
                    .entry(consume.name.clone())
                    .or_insert_with(|| serde_json::to_value(&consume.schema).unwrap_or_else(|_| json!({})));
            }
        }
    }

    let mut components = Map::new();
    components.insert("x-root".into(), json!(table.root));
    components.insert(
        "schemas".into(),
        Value::Object(schemas.into_iter().collect()),
    );
    if !params.is_empty() {
        components.insert(
            "parameters".into(),
            Value::Object(params.into_iter().collect()),
        );
    }
    Value::Object(components)
}

fn builtin_schemas() -> BTreeMap<String, Value> {
    let mut schemas = BTreeMap::new();
    schemas.insert(
        "Ok".to_string(),
        serde_json::to_value(schema_for!(OkBody)).unwrap_or_else(|_| json!({})),
    );
    schemas.insert(
        "OkResult".to_string(),
        serde_json::to_value(schema_for!(OkResult)).unwrap_or_else(|_| json!({})),
    );
    schemas.insert(
        "OkListResult".to_string(),
        serde_json::to_value(schema_for!(OkListResult)).unwrap_or_else(|_| json!({})),
    );
    schemas.insert(
        "ErrorMessage".to_string(),
        serde_json::to_value(schema_for!(ErrorMessage)).unwrap_or_else(|_| json!({})),
    );
    schemas.insert(
        "AuthToken".to_string(),
        serde_json::to_value(schema_for!(AuthToken)).unwrap_or_else(|_| json!({})),
    );
    schemas
}

fn is_templated(url: &str) -> bool {
    url.starts_with("/{")
}

fn is_factory_url(url: &str) -> bool {
    url.split("/new/")
        .nth(1)
        .is_some_and(|tail| !tail.is_empty() && !tail.contains('/'))
}

fn param_ref(type_name: &str, params: &mut BTreeMap<String, Value>) -> Value {
    let name = format!("{type_name}_Path");
    params.entry(name.clone()).or_insert_with(|| {
        json!({
            "name": name,
            "in": "path",
            "description": format!("The URL of the {type_name} without the first slash"),
            "required": true,
            "schema": {"type": "string"},
        })
    });
    json!({"$ref": format!("#/components/parameters/{name}")})
}

fn content_of(model: &str) -> Value {
    json!({
        "application/json": {
            "schema": {"$ref": format!("#/components/schemas/{model}")}
        }
    })
}

fn content_of_many(models: &[String]) -> Value {
    if models.len() == 1 {
        return content_of(&models[0]);
    }
    let refs: Vec<Value> = models
        .iter()
        .map(|model| json!({"$ref": format!("#/components/schemas/{model}")}))
        .collect();
    json!({"application/json": {"schema": {"oneOf": refs}}})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::introspect;
    use db::schema::{HandlerBuilder, IndexMode, ModelRegistry, ModelSpec, Reply};
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Task {
        name: String,
    }

    fn config() -> Config {
        Config {
            mongo_uri: "mongodb://localhost".into(),
            mongo_db: "test".into(),
            mongo_table: None,
            mongo_gridfs: false,
            jwt_secret: "secret".into(),
            mail_server: "localhost".into(),
            mail_port: 25,
            mail_sender: "noreply@example.com".into(),
            mail_args: None,
            debug: false,
            debug_notifications: true,
            server_name: Some("https://api.example.com".into()),
            oa_info: Some(json!({"title": "Example", "version": "1.0"})),
            oa_server_description: Some("Example deployment".into()),
        }
    }

    fn registry() -> ModelRegistry {
        let root = ModelSpec::builder("Group")
            .feature("IsMembered")
            .schema_of::<Task>()
            .child("users", "User", IndexMode::BySlug)
            .handler(HandlerBuilder::new("index").produces("OkResult").call(|_| async { Ok(Reply::Empty) }))
            .build();
        let user = ModelSpec::builder("User")
            .schema_of::<Task>()
            .child("tasks", "Task", IndexMode::BySlug)
            .handler(HandlerBuilder::new("index").produces("OkResult").call(|_| async { Ok(Reply::Empty) }))
            .handler(
                HandlerBuilder::new("update")
                    .consumes::<Task>()
                    .produces("OkResult")
                    .call(|_| async { Ok(Reply::Empty) }),
            )
            .build();
        let task = ModelSpec::builder("Task")
            .schema_of::<Task>()
            .child("tasks", "Task", IndexMode::BySlug)
            .build();
        ModelRegistry::build("Group", vec![root, user, task]).unwrap()
    }

    fn doc() -> Value {
        let registry = registry();
        let table = introspect(&registry);
        document(&config(), &registry, &table)
    }

    #[test]
    fn carries_info_and_servers() {
        let doc = doc();
        assert_eq!(doc["openapi"], json!("3.0.1"));
        assert_eq!(doc["info"]["title"], json!("Example"));
        assert_eq!(doc["servers"][0]["url"], json!("https://api.example.com"));
    }

    #[test]
    fn root_and_typed_operation_ids() {
        let doc = doc();
        assert_eq!(doc["paths"]["/"]["get"]["operationId"], json!("Root/index"));
        assert_eq!(
            doc["paths"]["/{User_Path}/"]["get"]["operationId"],
            json!("User/index")
        );
        assert_eq!(
            doc["paths"]["/{User_Path}/"]["get"]["parameters"][0]["$ref"],
            json!("#/components/parameters/User_Path")
        );
    }

    #[test]
    fn consuming_handler_gets_request_body() {
        let doc = doc();
        let update = &doc["paths"]["/{User_Path}/update"]["put"];
        assert_eq!(
            update["requestBody"]["content"]["application/json"]["schema"]["$ref"],
            json!("#/components/schemas/Task")
        );
        assert_eq!(
            update["responses"]["200"]["content"]["application/json"]["schema"]["$ref"],
            json!("#/components/schemas/OkResult")
        );
    }

    #[test]
    fn factories_get_canned_responses() {
        let doc = doc();
        let create = &doc["paths"]["/{User_Path}/new/task"]["post"];
        assert_eq!(create["operationId"], json!("User/create_task"));
        for code in ["200", "400", "401", "409"] {
            assert!(create["responses"][code].is_object(), "missing {code}");
        }
        // the recursive Task type can also be created under itself
        assert_eq!(
            doc["paths"]["/{Task_Path}/new/task"]["post"]["operationId"],
            json!("Task/create_task")
        );
    }

    #[test]
    fn components_carry_annotations() {
        let doc = doc();
        assert_eq!(doc["components"]["x-root"], json!("Group"));
        assert_eq!(
            doc["components"]["schemas"]["Group"]["x-features"],
            json!(["Group", "IsMembered"])
        );
        assert_eq!(
            doc["components"]["schemas"]["User"]["properties"]["name"].is_object(),
            true
        );
        assert!(doc["components"]["schemas"]["ErrorMessage"].is_object());
        assert!(doc["components"]["parameters"]["User_Path"].is_object());
    }

    #[test]
    fn projection_is_deterministic() {
        let registry = registry();
        let table = introspect(&registry);
        let first = document(&config(), &registry, &table);
        let second = document(&config(), &registry, &table);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
