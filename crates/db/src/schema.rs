//! Model registry and handler registration.
//!
//! Each entity type is described by a `ModelSpec` the model author builds
//! explicitly: its feature composition, slug source fields, child-list
//! fields, JSON schema, and handlers. The registry is assembled once at boot
//! and read-only afterwards; the introspection engine and the dispatcher are
//! both pure functions of it.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use schemars::{JsonSchema, Schema, schema_for};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use utils::slug::slugify;
use utils::token::AuthToken;

use crate::error::DbError;
use crate::node::Node;
use crate::store::Store;

/// How a child-list field references its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    BySlug,
    ById,
}

impl IndexMode {
    pub fn indexer(self) -> &'static str {
        match self {
            IndexMode::BySlug => "slug",
            IndexMode::ById => "_id",
        }
    }
}

/// A typed list field declaring a parent-child relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildField {
    pub field: String,
    pub child_type: String,
    pub mode: IndexMode,
}

/// Everything the framework knows about one entity type.
#[derive(Clone)]
pub struct ModelSpec {
    pub name: String,
    /// Ordered feature composition, exposed as `x-features`.
    pub features: Vec<String>,
    /// Fields feeding slug derivation, in order.
    pub sluger_fields: Vec<String>,
    pub child_fields: Vec<ChildField>,
    /// Fields dropped from the plain JSON projection (e.g. password hashes).
    pub exclude: Vec<String>,
    pub schema: Schema,
    /// A recursive type holds a self-referential child list, which makes a
    /// root model also addressable through `{Type_Path}` templates.
    pub recursive: bool,
    pub handlers: BTreeMap<String, HandlerSpec>,
}

impl fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSpec")
            .field("name", &self.name)
            .field("features", &self.features)
            .field("sluger_fields", &self.sluger_fields)
            .field("child_fields", &self.child_fields)
            .field("handlers", &self.handlers.keys())
            .finish()
    }
}

impl ModelSpec {
    pub fn builder(name: impl Into<String>) -> ModelSpecBuilder {
        ModelSpecBuilder::new(name)
    }

    /// Derive the slug from the declared source fields, preferring values in
    /// `fields`. `None` when the type declares no sluger or a source field
    /// is absent.
    pub fn derive_slug(&self, fields: &Document) -> Option<String> {
        if self.sluger_fields.is_empty() {
            return None;
        }
        let mut source = String::new();
        for name in &self.sluger_fields {
            let value = fields.get(name)?;
            if !source.is_empty() {
                source.push(' ');
            }
            match value {
                Bson::String(text) => source.push_str(text),
                other => source.push_str(&other.to_string()),
            }
        }
        Some(slugify(&source))
    }

    /// Child-list fields able to hold `child_type`.
    pub fn fields_for_child(&self, child_type: &str) -> Vec<&ChildField> {
        self.child_fields
            .iter()
            .filter(|field| field.child_type == child_type)
            .collect()
    }
}

pub struct ModelSpecBuilder {
    spec: ModelSpec,
}

impl ModelSpecBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        ModelSpecBuilder {
            spec: ModelSpec {
                name,
                features: Vec::new(),
                sluger_fields: vec!["name".to_string()],
                child_fields: Vec::new(),
                exclude: Vec::new(),
                schema: Schema::default(),
                recursive: false,
                handlers: BTreeMap::new(),
            },
        }
    }

    pub fn feature(mut self, name: impl Into<String>) -> Self {
        self.spec.features.push(name.into());
        self
    }

    /// Override the default `name` sluger source.
    pub fn sluger(mut self, fields: &[&str]) -> Self {
        self.spec.sluger_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn child(mut self, field: &str, child_type: &str, mode: IndexMode) -> Self {
        if child_type == self.spec.name {
            self.spec.recursive = true;
        }
        self.spec.child_fields.push(ChildField {
            field: field.to_string(),
            child_type: child_type.to_string(),
            mode,
        });
        self
    }

    pub fn exclude(mut self, field: &str) -> Self {
        self.spec.exclude.push(field.to_string());
        self
    }

    pub fn schema_of<T: JsonSchema>(mut self) -> Self {
        self.spec.schema = schema_for!(T);
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.spec.schema = schema;
        self
    }

    pub fn handler(mut self, handler: HandlerSpec) -> Self {
        self.spec.handlers.insert(handler.name.clone(), handler);
        self
    }

    pub fn build(self) -> ModelSpec {
        self.spec
    }
}

/// The registry: type name → spec, plus the designated root type.
#[derive(Debug)]
pub struct ModelRegistry {
    root: String,
    models: BTreeMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn build(root: impl Into<String>, specs: Vec<ModelSpec>) -> Result<Self, DbError> {
        let root = root.into();
        let mut models = BTreeMap::new();
        for spec in specs {
            models.insert(spec.name.clone(), spec);
        }
        if !models.contains_key(&root) {
            return Err(DbError::UnknownType(root));
        }
        Ok(ModelRegistry { root, models })
    }

    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> &ModelSpec {
        &self.models[&self.root]
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn expect(&self, name: &str) -> Result<&ModelSpec, DbError> {
        self.models
            .get(name)
            .ok_or_else(|| DbError::UnknownType(name.to_string()))
    }

    /// Case-insensitive lookup for factory URLs (`/new/<model>`).
    pub fn find_ignore_case(&self, name: &str) -> Option<&ModelSpec> {
        let lower = name.to_lowercase();
        self.models.values().find(|spec| spec.name.to_lowercase() == lower)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }
}

/// What a handler hands back to the dispatcher.
#[derive(Debug)]
pub enum Reply {
    /// A tree node; enveloped as its plain-dict projection.
    Node(Node),
    /// Enveloped as `OkListResult`.
    List(Vec<Value>),
    /// Enveloped as `OkResult`.
    Value(Value),
    /// Serialized as a bare `{access_token}` object.
    Token(AuthToken),
    /// Enveloped as a plain `Ok`.
    Empty,
}

/// Handler-surfaced failures; `code()` matches the error taxonomy.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    /// A declared recoverable outcome at an explicit status code.
    #[error("{message}")]
    Message { code: u16, message: String },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn code(&self) -> u16 {
        match self {
            HandlerError::Validation(_) => 400,
            HandlerError::Unauthorized => 401,
            HandlerError::NotFound(_) => 404,
            HandlerError::Message { code, .. } => *code,
            HandlerError::Db(DbError::DuplicateKey(_)) => 409,
            HandlerError::Db(DbError::NotFound(_)) => 404,
            HandlerError::Db(_) => 500,
            HandlerError::Internal(_) => 500,
        }
    }
}

/// The bundle a handler is invoked with: the resolved node, the actor (when
/// the bearer token named one), the decoded body (when the handler
/// consumes), and the process-wide collaborators.
pub struct HandlerCall {
    pub store: Store,
    pub env: Arc<RuntimeEnv>,
    pub node: Node,
    pub actor: Option<Node>,
    pub body: Option<Value>,
}

impl HandlerCall {
    /// Decode the request body into the handler's consume model.
    pub fn consume<C: DeserializeOwned>(&self) -> Result<C, HandlerError> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| HandlerError::Validation("Data must be provided".into()))?;
        serde_json::from_value(body).map_err(|err| HandlerError::Validation(err.to_string()))
    }
}

/// Process-wide collaborators handlers may need.
pub struct RuntimeEnv {
    pub jwt_secret: String,
    pub token_exp_minutes: i64,
    pub debug: bool,
    pub notifier: Arc<dyn Notifier>,
}

/// Dispatch hook for named notifications (e.g. `forgot_password`).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, name: &str, payload: Value) -> Result<(), NotifyError>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("the server has no `{0}` notification")]
    Unknown(String),
    #[error("notification transport failed: {0}")]
    Transport(String),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, HandlerError>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(HandlerCall) -> HandlerFuture + Send + Sync>;

/// The request body contract of a consuming handler.
#[derive(Clone)]
pub struct ConsumeSpec {
    pub name: String,
    pub schema: Schema,
    validate: Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>,
}

impl ConsumeSpec {
    pub fn of<C: JsonSchema + DeserializeOwned + 'static>() -> Self {
        ConsumeSpec {
            name: C::schema_name().to_string(),
            schema: schema_for!(C),
            validate: Arc::new(|value| {
                serde_json::from_value::<C>(value.clone())
                    .map(|_| ())
                    .map_err(|err| err.to_string())
            }),
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        (self.validate)(value)
    }
}

impl fmt::Debug for ConsumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumeSpec").field("name", &self.name).finish()
    }
}

/// A declared recoverable failure: feeds the per-route response code table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashSpec {
    pub error: String,
    pub returns: String,
    pub code: u16,
    pub description: String,
}

impl CrashSpec {
    /// Defaults per error kind, overridable through the builder methods.
    pub fn for_kind(error: &str) -> Self {
        let code = match error {
            "ValidationError" => 400,
            "Unauthorized" => 401,
            "NotFound" => 404,
            "URIAlreadyExists" => 409,
            "ExistException" => 422,
            "AlreadyRequested" => 429,
            _ => 500,
        };
        let description = match code {
            400 => "Returns the validation errors",
            401 => "Raised when the actor lacks privileges",
            404 => "Raised when not found",
            409 => "Raised when the url already exists",
            422 => "Raised when the entity already exists",
            429 => "Raised while a previous request is still active",
            _ => "",
        };
        CrashSpec {
            error: error.to_string(),
            returns: "ErrorMessage".to_string(),
            code,
            description: description.to_string(),
        }
    }

    pub fn returns(mut self, model: &str) -> Self {
        self.returns = model.to_string();
        self
    }

    pub fn code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }
}

/// A registered handler: the callable plus the metadata the introspection
/// engine classifies it by.
#[derive(Clone)]
pub struct HandlerSpec {
    pub name: String,
    pub takes_actor: bool,
    pub consumes: Option<ConsumeSpec>,
    pub produces: Vec<String>,
    pub description: Option<String>,
    pub can_crash: Vec<CrashSpec>,
    pub func: HandlerFn,
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("name", &self.name)
            .field("takes_actor", &self.takes_actor)
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .finish()
    }
}

pub struct HandlerBuilder {
    name: String,
    takes_actor: bool,
    consumes: Option<ConsumeSpec>,
    produces: Vec<String>,
    description: Option<String>,
    can_crash: Vec<CrashSpec>,
}

impl HandlerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        HandlerBuilder {
            name: name.into(),
            takes_actor: false,
            consumes: None,
            produces: Vec::new(),
            description: None,
            can_crash: Vec::new(),
        }
    }

    /// The handler receives the resolved actor.
    pub fn actor(mut self) -> Self {
        self.takes_actor = true;
        self
    }

    pub fn consumes<C: JsonSchema + DeserializeOwned + 'static>(mut self) -> Self {
        self.consumes = Some(ConsumeSpec::of::<C>());
        self
    }

    pub fn produces(mut self, model: &str) -> Self {
        self.produces.push(model.to_string());
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    pub fn crash(mut self, crash: CrashSpec) -> Self {
        self.can_crash.push(crash);
        self
    }

    pub fn call<F, Fut>(self, func: F) -> HandlerSpec
    where
        F: Fn(HandlerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerError>> + Send + 'static,
    {
        HandlerSpec {
            name: self.name,
            takes_actor: self.takes_actor,
            consumes: self.consumes,
            produces: self.produces,
            description: self.description,
            can_crash: self.can_crash,
            func: Arc::new(move |call| Box::pin(func(call))),
        }
    }
}
