//! The catch-all dispatcher.
//!
//! Every request resolves a URL to a node (walking toward the root within
//! the verb's tolerance so the trailing segment can be a member name), looks
//! up the permission rule for `(context, member)`, resolves the actor from
//! the bearer token, decodes the body when the handler consumes a model, and
//! wraps the outcome in the uniform envelope with timing fields.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use db::auth::get_actor;
use db::bson::{Bson, doc};
use db::error::DbError;
use db::node::Node;
use db::permission::{self, permission_name};
use db::schema::{HandlerCall, HandlerError, ModelSpec, Reply};
use utils::response::{Body, ErrorMessage, Ok as OkBody, OkListResult, OkResult};
use utils::token::AuthToken;

use crate::ServerContext;
use crate::error::{db_error, handler_error};
use crate::introspect::Verb;

/// Wall-clock and process-CPU counters started before the pipeline runs.
struct Timed {
    started: Instant,
    cpu: f64,
}

impl Timed {
    fn start() -> Self {
        Timed { started: Instant::now(), cpu: process_time() }
    }

    fn finish(self, body: Body) -> Response {
        let (code, value) = body.finalize(
            self.started.elapsed().as_secs_f64(),
            process_time() - self.cpu,
        );
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(value)).into_response()
    }
}

fn process_time() -> f64 {
    match nix::time::clock_gettime(nix::time::ClockId::CLOCK_PROCESS_CPUTIME_ID) {
        Ok(spec) => spec.tv_sec() as f64 + spec.tv_nsec() as f64 / 1e9,
        Err(_) => 0.0,
    }
}

fn parse_json(payload: &Bytes) -> Option<Value> {
    if payload.is_empty() {
        return None;
    }
    serde_json::from_slice(payload).ok()
}

/// The member is whatever trails the resolved node's url.
fn extract_member(url: &str, path: &str) -> String {
    if url == "/" {
        return path[1..].to_string();
    }
    let rest = path.strip_prefix(url).unwrap_or("");
    rest.strip_prefix('/').unwrap_or(rest).to_string()
}

/// An empty member defaults per verb.
fn default_member(verb: Verb) -> &'static str {
    match verb {
        Verb::Get => "index",
        Verb::Put => "update",
        Verb::Delete => "remove",
        Verb::Post => "",
    }
}

/// Split a POST catch-all path into the parent rest and the factory model:
/// `a/b/new/task` → (`a/b`, `task`).
fn parse_factory_path(rest: &str) -> Option<(String, String)> {
    let (head, model) = rest.rsplit_once('/')?;
    if model.is_empty() {
        return None;
    }
    let parent = if head == "new" { "" } else { head.strip_suffix("/new")? };
    Some((parent.to_string(), model.to_string()))
}

fn not_found(path: &str) -> Body {
    Body::Error(ErrorMessage::new(format!("{path} not found"), 404))
}

fn data_required() -> Body {
    Body::Error(ErrorMessage::new("Data must be provided", 400))
}

fn bearer(headers: &HeaderMap) -> Option<AuthToken> {
    AuthToken::get(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    )
}

async fn resolve(ctx: &ServerContext, path: &str, tolerance: u32) -> Result<Node, Body> {
    match ctx.store.get_path(path, tolerance).await {
        Ok(node) => Ok(node),
        Err(DbError::NotFound(message)) => Err(Body::Error(ErrorMessage::new(message, 404))),
        Err(err) => Err(Body::Error(db_error(err, ctx.env.debug))),
    }
}

/// Permission lookup + actor resolution. No matching rule, or a rule the
/// gate rejects, is a 401.
async fn authorize(
    ctx: &ServerContext,
    node: &Node,
    member: &str,
    headers: &HeaderMap,
) -> Result<Option<Node>, Body> {
    let rule = permission::lookup(&ctx.store, &node.type_name, permission_name(member))
        .await
        .map_err(|err| Body::Error(db_error(err, ctx.env.debug)))?;

    let token = bearer(headers);
    let actor = get_actor(&ctx.store, token.as_ref(), &ctx.env.jwt_secret)
        .await
        .map_err(|err| Body::Error(db_error(err, ctx.env.debug)))?;

    let allowed = match &rule {
        Some(rule) => ctx.gate.allows(rule, actor.as_ref(), node).await,
        None => false,
    };
    if allowed {
        Ok(actor)
    } else {
        Err(Body::Error(ErrorMessage::new("Unauthorized", 401)))
    }
}

fn reply_body(ctx: &ServerContext, reply: Reply, created: bool) -> Body {
    let code = if created { 201 } else { 200 };
    match reply {
        Reply::Node(node) => {
            Body::Result(OkResult { ok: true, code, result: ctx.store.to_plain(&node) })
        }
        Reply::Value(value) => Body::Result(OkResult { ok: true, code, result: value }),
        Reply::List(values) => Body::List(OkListResult { ok: true, code, result: values }),
        Reply::Token(token) => Body::Raw(json!({"access_token": token.access_token})),
        Reply::Empty => Body::Ok(OkBody { ok: true, code }),
    }
}

/// The GET/PUT pipeline: resolve with tolerance 1, recover the member name,
/// authorize, decode, invoke.
async fn run_call(
    ctx: &ServerContext,
    verb: Verb,
    rest: &str,
    headers: &HeaderMap,
    body: Option<Value>,
) -> Body {
    let path = format!("/{rest}");
    let node = match resolve(ctx, &path, 1).await {
        Ok(node) => node,
        Err(body) => return body,
    };

    let mut member = extract_member(&node.url(), &path);
    if member.is_empty() {
        member = default_member(verb).to_string();
    }

    let Some(meta) = ctx.introspection.handler(&node.type_name, &member) else {
        return not_found(&path);
    };
    if meta.verb != verb {
        return not_found(&path);
    }

    let actor = match authorize(ctx, &node, &member, headers).await {
        Ok(actor) => actor,
        Err(body) => return body,
    };

    let Some(spec) = ctx.registry.get(&node.type_name) else {
        return not_found(&path);
    };
    let Some(handler) = spec.handlers.get(&member) else {
        return not_found(&path);
    };

    let decoded = match &handler.consumes {
        Some(consume) => {
            let Some(raw) = body else { return data_required() };
            if let Err(message) = consume.validate(&raw) {
                return Body::Error(ErrorMessage::new(format!("Validation error: {message}"), 400));
            }
            Some(raw)
        }
        None => None,
    };

    let call = HandlerCall {
        store: ctx.store.clone(),
        env: ctx.env.clone(),
        node,
        actor,
        body: decoded,
    };
    match (handler.func)(call).await {
        Ok(reply) => reply_body(ctx, reply, false),
        Err(err) => Body::Error(handler_error(err, ctx.env.debug)),
    }
}

/// DELETE pipeline: exact resolution, then the type's `remove` handler or
/// the generic subtree remover.
async fn run_remove(ctx: &ServerContext, rest: &str, headers: &HeaderMap) -> Body {
    let path = format!("/{rest}");
    let mut node = match resolve(ctx, &path, 0).await {
        Ok(node) => node,
        Err(body) => return body,
    };

    let actor = match authorize(ctx, &node, "remove", headers).await {
        Ok(actor) => actor,
        Err(body) => return body,
    };

    let handler = ctx
        .registry
        .get(&node.type_name)
        .and_then(|spec| spec.handlers.get("remove").cloned());
    if let Some(handler) = handler {
        let call = HandlerCall {
            store: ctx.store.clone(),
            env: ctx.env.clone(),
            node,
            actor,
            body: None,
        };
        return match (handler.func)(call).await {
            Ok(reply) => reply_body(ctx, reply, false),
            Err(err) => Body::Error(handler_error(err, ctx.env.debug)),
        };
    }

    match generic_remover(ctx, &mut node, actor).await {
        Ok(reply) => reply_body(ctx, reply, false),
        Err(err) => Body::Error(handler_error(err, ctx.env.debug)),
    }
}

/// Drop the actor's ownership role and delete the whole subtree.
async fn generic_remover(
    ctx: &ServerContext,
    node: &mut Node,
    actor: Option<Node>,
) -> Result<Reply, HandlerError> {
    let url = node.url();
    ctx.store.delete(node).await?;

    let mut remaining = Vec::new();
    if let Some(mut actor_node) = actor {
        let owner = format!("owner@{url}");
        let mut roles = actor_node.list_field("roles");
        roles.retain(|role| role.as_str() != Some(owner.as_str()));
        remaining = roles
            .iter()
            .filter_map(Bson::as_str)
            .map(|role| Value::String(role.to_string()))
            .collect();
        ctx.store
            .update(&mut actor_node, doc! {"roles": Bson::Array(roles)})
            .await?;
    }
    Ok(Reply::List(remaining))
}

/// POST factory pipeline: exact resolution of the parent, then the declared
/// `create_<model>` handler or the generic child creation.
async fn run_factory(
    ctx: &ServerContext,
    rest: &str,
    model: &str,
    headers: &HeaderMap,
    body: Option<Value>,
) -> Body {
    let path = format!("/{rest}");
    let Some(raw) = body else { return data_required() };

    let Some(child_spec) = ctx.registry.find_ignore_case(model) else {
        return Body::Error(ErrorMessage::new(format!("unknown model `{model}`"), 404));
    };

    let node = match resolve(ctx, &path, 0).await {
        Ok(node) => node,
        Err(body) => return body,
    };

    let member = format!("create_{}", model.to_lowercase());
    let actor = match authorize(ctx, &node, &member, headers).await {
        Ok(actor) => actor,
        Err(body) => return body,
    };

    let child_label = raw
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(&child_spec.name)
        .to_string();

    let handler = ctx
        .registry
        .get(&node.type_name)
        .and_then(|spec| spec.handlers.get(&member).cloned());
    let outcome = if let Some(handler) = handler {
        let decoded = match &handler.consumes {
            Some(consume) => match consume.validate(&raw) {
                Ok(()) => Some(raw),
                Err(message) => {
                    return Body::Error(ErrorMessage::new(
                        format!("Validation error: {message}"),
                        400,
                    ));
                }
            },
            None => Some(raw),
        };
        let call = HandlerCall {
            store: ctx.store.clone(),
            env: ctx.env.clone(),
            node: node.clone(),
            actor,
            body: decoded,
        };
        (handler.func)(call).await
    } else {
        generic_factory(ctx, &node, actor, child_spec, raw).await
    };

    match outcome {
        Ok(reply) => reply_body(ctx, reply, true),
        Err(HandlerError::Db(DbError::DuplicateKey(_))) => Body::Error(ErrorMessage::new(
            format!("{child_label} already exists @ {}", node.label()),
            409,
        )),
        Err(err) => Body::Error(handler_error(err, ctx.env.debug)),
    }
}

/// Create the child under the parent and grant the actor ownership.
async fn generic_factory(
    ctx: &ServerContext,
    parent: &Node,
    actor: Option<Node>,
    child_spec: &ModelSpec,
    raw: Value,
) -> Result<Reply, HandlerError> {
    let fields = db::bson::to_bson(&raw).map_err(|err| HandlerError::Validation(err.to_string()))?;
    let Bson::Document(mut fields) = fields else {
        return Err(HandlerError::Validation("Data must be an object".to_string()));
    };
    fields.remove("_id");
    fields.remove("type");
    fields.remove("path");
    let slug = fields.remove("slug");

    let mut child = Node::new(child_spec.name.as_str(), "", fields);
    if let Some(Bson::String(slug)) = slug {
        child.slug = slug;
    }

    let mut parent = parent.clone();
    ctx.store.create_child(&mut parent, &mut child, None, None).await?;

    let mut roles_out = Vec::new();
    if let Some(mut actor_node) = actor {
        let mut roles = actor_node.list_field("roles");
        roles.push(Bson::String(format!("owner@{}", child.url())));
        roles_out = roles
            .iter()
            .filter_map(Bson::as_str)
            .map(|role| Value::String(role.to_string()))
            .collect();
        ctx.store
            .update(&mut actor_node, doc! {"roles": Bson::Array(roles)})
            .await?;
    }

    Ok(Reply::Value(json!({
        "object": ctx.store.to_plain(&child),
        "actor_roles": roles_out,
    })))
}

/// POST /auth: the root model's credential exchange. No permission rule
/// guards the login itself.
async fn run_auth(ctx: &ServerContext, body: Option<Value>) -> Body {
    let Some(raw) = body else { return data_required() };

    let root = match ctx.store.root().await {
        Ok(root) => root,
        Err(err) => return Body::Error(db_error(err, ctx.env.debug)),
    };
    let handler = ctx
        .registry
        .get(&root.type_name)
        .and_then(|spec| spec.handlers.get("auth").cloned());
    let Some(handler) = handler else { return not_found("/auth") };

    if let Some(consume) = &handler.consumes {
        if let Err(message) = consume.validate(&raw) {
            return Body::Error(ErrorMessage::new(format!("Validation error: {message}"), 400));
        }
    }

    let call = HandlerCall {
        store: ctx.store.clone(),
        env: ctx.env.clone(),
        node: root,
        actor: None,
        body: Some(raw),
    };
    match (handler.func)(call).await {
        Ok(reply) => reply_body(ctx, reply, false),
        Err(err) => Body::Error(handler_error(err, ctx.env.debug)),
    }
}

pub async fn root_dispatcher(State(ctx): State<ServerContext>, headers: HeaderMap) -> Response {
    let timer = Timed::start();
    let body = run_call(&ctx, Verb::Get, "", &headers, None).await;
    timer.finish(body)
}

pub async fn path_dispatcher(
    State(ctx): State<ServerContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let timer = Timed::start();
    let body = run_call(&ctx, Verb::Get, &path, &headers, None).await;
    timer.finish(body)
}

pub async fn root_updater(
    State(ctx): State<ServerContext>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let timer = Timed::start();
    let body = run_call(&ctx, Verb::Put, "", &headers, parse_json(&payload)).await;
    timer.finish(body)
}

pub async fn path_updater(
    State(ctx): State<ServerContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let timer = Timed::start();
    let body = run_call(&ctx, Verb::Put, &path, &headers, parse_json(&payload)).await;
    timer.finish(body)
}

pub async fn path_remover(
    State(ctx): State<ServerContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let timer = Timed::start();
    let body = run_remove(&ctx, &path, &headers).await;
    timer.finish(body)
}

pub async fn root_factory(
    State(ctx): State<ServerContext>,
    Path(model): Path<String>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let timer = Timed::start();
    let body = run_factory(&ctx, "", &model, &headers, parse_json(&payload)).await;
    timer.finish(body)
}

/// POST catch-all: only `…/new/<model>` shapes are factory calls.
pub async fn path_factory(
    State(ctx): State<ServerContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let timer = Timed::start();
    let body = match parse_factory_path(&path) {
        Some((parent, model)) => {
            run_factory(&ctx, &parent, &model, &headers, parse_json(&payload)).await
        }
        None => not_found(&format!("/{path}")),
    };
    timer.finish(body)
}

pub async fn auth_login(State(ctx): State<ServerContext>, payload: Bytes) -> Response {
    let timer = Timed::start();
    let body = run_auth(&ctx, parse_json(&payload)).await;
    timer.finish(body)
}

pub async fn openapi_doc(State(ctx): State<ServerContext>) -> Json<Value> {
    Json(ctx.openapi.as_ref().clone())
}

pub async fn generic_options() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_extraction() {
        assert_eq!(extract_member("/", "/"), "");
        assert_eq!(extract_member("/", "/forgot_password"), "forgot_password");
        assert_eq!(extract_member("/a/b", "/a/b"), "");
        assert_eq!(extract_member("/a/b", "/a/b/history"), "history");
    }

    #[test]
    fn empty_member_defaults_per_verb() {
        assert_eq!(default_member(Verb::Get), "index");
        assert_eq!(default_member(Verb::Put), "update");
        assert_eq!(default_member(Verb::Delete), "remove");
    }

    #[test]
    fn factory_paths_parse() {
        assert_eq!(
            parse_factory_path("garito/new/task"),
            Some(("garito".to_string(), "task".to_string()))
        );
        assert_eq!(
            parse_factory_path("a/b/c/new/task"),
            Some(("a/b/c".to_string(), "task".to_string()))
        );
        assert_eq!(parse_factory_path("a/b/c"), None);
        assert_eq!(parse_factory_path("new/"), None);
    }

    #[test]
    fn json_bodies_parse_or_resolve_to_none() {
        assert_eq!(parse_json(&Bytes::new()), None);
        assert_eq!(parse_json(&Bytes::from_static(b"not json")), None);
        assert_eq!(
            parse_json(&Bytes::from_static(b"{\"name\":\"B2\"}")),
            Some(json!({"name": "B2"}))
        );
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Bearer tok".parse().unwrap());
        assert_eq!(bearer(&headers).unwrap().access_token, "tok");
    }
}
