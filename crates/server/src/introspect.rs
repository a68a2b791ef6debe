//! The introspection engine.
//!
//! At startup this walks the registry from the root type through the
//! child-field graph (breadth-first, deduping by type) and classifies every
//! registered handler into a verb and its URL templates. The result drives
//! both routing and the OpenAPI projection, and is a pure function of the
//! registry: re-running it yields an identical table.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use strum_macros::Display;

use db::schema::{HandlerSpec, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashMeta {
    pub returns: String,
    pub code: u16,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerMeta {
    pub verb: Verb,
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumes: Option<String>,
    pub produces: Vec<String>,
    pub actor: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub can_crash: BTreeMap<String, CrashMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeEntry {
    pub handlers: BTreeMap<String, HandlerMeta>,
    pub factories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Introspection {
    pub root: String,
    pub types: BTreeMap<String, TypeEntry>,
}

impl Introspection {
    /// The handler entry a member resolves to on a type; `index` is keyed
    /// as `call`.
    pub fn handler(&self, type_name: &str, member: &str) -> Option<&HandlerMeta> {
        let key = if member == "index" { "call" } else { member };
        self.types.get(type_name)?.handlers.get(key)
    }
}

pub fn introspect(registry: &ModelRegistry) -> Introspection {
    let root = registry.root_name().to_string();
    let mut types = BTreeMap::new();

    let mut queue = VecDeque::from([root.clone()]);
    let mut seen: BTreeSet<String> = BTreeSet::from([root.clone()]);
    while let Some(name) = queue.pop_front() {
        let Some(spec) = registry.get(&name) else {
            continue;
        };
        types.insert(name.clone(), analyze(spec, name == root));
        for child_field in &spec.child_fields {
            if seen.insert(child_field.child_type.clone()) {
                queue.push_back(child_field.child_type.clone());
            }
        }
    }

    Introspection { root, types }
}

fn analyze(spec: &ModelSpec, is_root: bool) -> TypeEntry {
    let mut handlers = BTreeMap::new();
    for (name, handler) in &spec.handlers {
        let key = if name == "index" { "call" } else { name.as_str() };
        handlers.insert(key.to_string(), classify(spec, handler, is_root));
    }

    let mut factories = Vec::new();
    for child_field in &spec.child_fields {
        if !factories.contains(&child_field.child_type) {
            factories.push(child_field.child_type.clone());
        }
    }

    TypeEntry { handlers, factories }
}

/// Verb and URL templates from the handler's shape and name. Templates
/// without `{Type_Path}` are emitted only for the root type; `{Type_Path}`
/// templates for non-root types, and additionally for a recursive root.
fn classify(spec: &ModelSpec, handler: &HandlerSpec, is_root: bool) -> HandlerMeta {
    let model = &spec.name;
    let with_model_path = !is_root || spec.recursive;
    let name = &handler.name;

    let mut urls = Vec::new();
    let verb = if let Some(consume) = &handler.consumes {
        let consumed = consume.name.to_lowercase();
        if *name == format!("create_{consumed}") {
            if is_root {
                urls.push(format!("/new/{consumed}"));
            }
            if with_model_path {
                urls.push(format!("/{{{model}_Path}}/new/{consumed}"));
            }
            Verb::Post
        } else {
            if is_root {
                urls.push(format!("/{name}"));
            }
            if with_model_path {
                urls.push(format!("/{{{model}_Path}}/{name}"));
            }
            if name == "auth" { Verb::Post } else { Verb::Put }
        }
    } else if name == "remove" {
        if is_root {
            urls.push("/".to_string());
        }
        if with_model_path {
            urls.push(format!("/{{{model}_Path}}/"));
        }
        Verb::Delete
    } else {
        if is_root {
            urls.push(if name == "index" { "/".to_string() } else { format!("/{name}") });
        }
        if with_model_path {
            urls.push(if name == "index" {
                format!("/{{{model}_Path}}/")
            } else {
                format!("/{{{model}_Path}}/{name}")
            });
        }
        Verb::Get
    };

    HandlerMeta {
        verb,
        urls,
        consumes: handler.consumes.as_ref().map(|consume| consume.name.clone()),
        produces: handler.produces.clone(),
        actor: handler.takes_actor,
        description: handler.description.clone(),
        can_crash: handler
            .can_crash
            .iter()
            .map(|crash| {
                (
                    crash.error.clone(),
                    CrashMeta {
                        returns: crash.returns.clone(),
                        code: crash.code,
                        description: crash.description.clone(),
                    },
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::schema::{HandlerBuilder, IndexMode, ModelSpec, Reply};
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Task {
        name: String,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Auth {
        email: String,
        password: String,
    }

    fn noop(name: &str) -> HandlerBuilder {
        HandlerBuilder::new(name)
    }

    fn registry() -> ModelRegistry {
        let group = ModelSpec::builder("Group")
            .child("users", "User", IndexMode::BySlug)
            .handler(noop("index").call(|_| async { Ok(Reply::Empty) }))
            .handler(noop("auth").consumes::<Auth>().produces("AuthToken").call(|_| async { Ok(Reply::Empty) }))
            .build();
        let user = ModelSpec::builder("User")
            .child("tasks", "Task", IndexMode::BySlug)
            .child("archived", "Task", IndexMode::BySlug)
            .handler(noop("index").actor().call(|_| async { Ok(Reply::Empty) }))
            .handler(noop("profile").call(|_| async { Ok(Reply::Empty) }))
            .handler(noop("create_task").consumes::<Task>().produces("OkResult").call(|_| async { Ok(Reply::Empty) }))
            .handler(noop("update").consumes::<Task>().produces("OkResult").call(|_| async { Ok(Reply::Empty) }))
            .handler(noop("remove").call(|_| async { Ok(Reply::Empty) }))
            .build();
        let task = ModelSpec::builder("Task")
            .child("tasks", "Task", IndexMode::BySlug)
            .handler(noop("index").call(|_| async { Ok(Reply::Empty) }))
            .build();
        ModelRegistry::build("Group", vec![group, user, task]).unwrap()
    }

    #[test]
    fn walks_the_child_graph() {
        let table = introspect(&registry());
        assert_eq!(table.root, "Group");
        assert_eq!(
            table.types.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["Group", "Task", "User"]
        );
    }

    #[test]
    fn index_is_keyed_as_call() {
        let table = introspect(&registry());
        assert!(table.types["Group"].handlers.contains_key("call"));
        assert!(table.handler("User", "index").is_some());
    }

    #[test]
    fn root_index_urls_have_no_type_path() {
        let table = introspect(&registry());
        let call = &table.types["Group"].handlers["call"];
        assert_eq!(call.verb, Verb::Get);
        assert_eq!(call.urls, vec!["/"]);
    }

    #[test]
    fn non_root_handlers_use_type_path_templates() {
        let table = introspect(&registry());
        let call = &table.types["User"].handlers["call"];
        assert_eq!(call.urls, vec!["/{User_Path}/"]);
        assert!(call.actor);

        let profile = &table.types["User"].handlers["profile"];
        assert_eq!(profile.verb, Verb::Get);
        assert_eq!(profile.urls, vec!["/{User_Path}/profile"]);
    }

    #[test]
    fn factory_handler_is_post_on_new() {
        let table = introspect(&registry());
        let create = &table.types["User"].handlers["create_task"];
        assert_eq!(create.verb, Verb::Post);
        assert_eq!(create.urls, vec!["/{User_Path}/new/task"]);
        assert_eq!(create.consumes.as_deref(), Some("Task"));
    }

    #[test]
    fn consuming_handlers_are_put_auth_is_post() {
        let table = introspect(&registry());
        let update = &table.types["User"].handlers["update"];
        assert_eq!(update.verb, Verb::Put);
        assert_eq!(update.urls, vec!["/{User_Path}/update"]);

        let auth = &table.types["Group"].handlers["auth"];
        assert_eq!(auth.verb, Verb::Post);
        assert_eq!(auth.urls, vec!["/auth"]);
    }

    #[test]
    fn remove_is_delete_on_the_node_url() {
        let table = introspect(&registry());
        let remove = &table.types["User"].handlers["remove"];
        assert_eq!(remove.verb, Verb::Delete);
        assert_eq!(remove.urls, vec!["/{User_Path}/"]);
    }

    #[test]
    fn recursive_root_gets_both_template_families() {
        let root = ModelSpec::builder("Task")
            .child("tasks", "Task", IndexMode::BySlug)
            .handler(noop("index").call(|_| async { Ok(Reply::Empty) }))
            .build();
        let registry = ModelRegistry::build("Task", vec![root]).unwrap();
        let table = introspect(&registry);
        let call = &table.types["Task"].handlers["call"];
        assert_eq!(call.urls, vec!["/", "/{Task_Path}/"]);
    }

    #[test]
    fn factories_are_the_deduped_child_types() {
        let table = introspect(&registry());
        assert_eq!(table.types["User"].factories, vec!["Task"]);
        assert_eq!(table.types["Group"].factories, vec!["User"]);
    }

    #[test]
    fn introspection_is_deterministic() {
        let registry = registry();
        let first = introspect(&registry);
        let second = introspect(&registry);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
