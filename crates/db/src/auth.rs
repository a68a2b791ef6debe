//! The authentication feature.
//!
//! `register_auth` installs three handlers on a model (usually the root):
//! `auth` exchanges credentials for a bearer token, `forgot_password` issues
//! a one-per-email reset token and fires the notification, `reset_password`
//! consumes the token and rehashes the user's password. Password hashing is
//! CPU-bound and always runs on the blocking pool.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, oid::ObjectId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use utils::password::{check_password_hash, generate_password_hash};
use utils::token::AuthToken;

use crate::error::DbError;
use crate::node::Node;
use crate::schema::{
    CrashSpec, HandlerBuilder, HandlerCall, HandlerError, ModelSpec, ModelSpecBuilder, Reply,
};
use crate::store::{Query, Store, WriteOp};

pub const USER_TYPE: &str = "User";
pub const RESET_TOKEN_TYPE: &str = "PasswordResetToken";

/// The authentication model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Auth {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResetPassword {
    pub code: Uuid,
    pub password: String,
}

/// A pending password-reset request, stored under the root. Its slug derives
/// from the email, so the unique `(path, slug)` index enforces one active
/// request per address; the TTL index on `created_at` expires it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PasswordResetToken {
    pub email: String,
    pub code: Uuid,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn new(email: impl Into<String>) -> Self {
        PasswordResetToken {
            email: email.into(),
            code: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    pub fn into_node(self) -> Node {
        Node::new(
            RESET_TOKEN_TYPE,
            "/",
            doc! {
                "email": self.email,
                "code": self.code.to_string(),
                "created_at": bson::DateTime::from_millis(self.created_at.timestamp_millis()),
            },
        )
    }

    pub fn spec() -> ModelSpec {
        ModelSpec::builder(RESET_TOKEN_TYPE)
            .sluger(&["email"])
            .schema_of::<PasswordResetToken>()
            .build()
    }
}

/// Resolve the actor named by a bearer token; an absent or invalid token is
/// simply no actor.
pub async fn get_actor(
    store: &Store,
    token: Option<&AuthToken>,
    secret: &str,
) -> Result<Option<Node>, DbError> {
    let Some(claims) = token.and_then(|token| token.verify(secret)) else {
        return Ok(None);
    };
    let Ok(id) = ObjectId::parse_str(&claims.user_id) else {
        return Ok(None);
    };
    store.get_one(USER_TYPE, Query::default().id(id)).await
}

/// Authorizes email and password.
pub async fn auth(call: HandlerCall) -> Result<Reply, HandlerError> {
    let credentials: Auth = call.consume()?;

    let user = call
        .store
        .get_one(USER_TYPE, Query::default().filter("email", credentials.email.as_str()))
        .await?;
    let Some(user) = user else {
        return Err(auth_failed());
    };

    let hashed = user.str_field("password").unwrap_or_default().to_string();
    let password = credentials.password;
    let matches = tokio::task::spawn_blocking(move || check_password_hash(&hashed, &password))
        .await
        .map_err(|err| HandlerError::Internal(err.to_string()))?;
    if !matches {
        return Err(auth_failed());
    }

    let user_id = user.id.ok_or(DbError::Unsaved)?;
    let token = AuthToken::generate(
        &user_id.to_hex(),
        &call.env.jwt_secret,
        call.env.token_exp_minutes,
    )
    .map_err(|err| HandlerError::Internal(err.to_string()))?;
    Ok(Reply::Token(token))
}

fn auth_failed() -> HandlerError {
    HandlerError::Message {
        code: 401,
        message: "The authentication has failed".to_string(),
    }
}

/// Sends a password recovery notification to the specified email.
pub async fn forgot_password(call: HandlerCall) -> Result<Reply, HandlerError> {
    let request: ForgotPasswordRequest = call.consume()?;

    let user = call
        .store
        .get_one(USER_TYPE, Query::default().filter("email", request.email.as_str()))
        .await?;
    let Some(user) = user else {
        return Err(HandlerError::Message {
            code: 404,
            message: "Unregistered email".to_string(),
        });
    };

    let previous = call
        .store
        .get_one(RESET_TOKEN_TYPE, Query::default().filter("email", request.email.as_str()))
        .await?;
    if previous.is_some() {
        return Err(HandlerError::Message {
            code: 429,
            message: "Already requested".to_string(),
        });
    }

    let mut token = PasswordResetToken::new(request.email).into_node();
    call.store.create(&mut token).await?;

    call.env
        .notifier
        .notify(
            "forgot_password",
            json!({
                "actor": call.store.to_plain(&user),
                "token": call.store.to_plain(&token),
            }),
        )
        .await
        .map_err(|err| HandlerError::Internal(err.to_string()))?;

    Ok(Reply::Empty)
}

/// Resets the password: consume the token, rehash, delete the token, all in
/// one transaction.
pub async fn reset_password(call: HandlerCall) -> Result<Reply, HandlerError> {
    let request: ResetPassword = call.consume()?;

    let token = call
        .store
        .get_one(
            RESET_TOKEN_TYPE,
            Query::default().filter("code", request.code.to_string()),
        )
        .await?;
    let Some(token) = token else {
        return Err(HandlerError::Message {
            code: 404,
            message: "Invalid or expired code".to_string(),
        });
    };

    let email = token.str_field("email").unwrap_or_default().to_string();
    let user = call
        .store
        .get_one(USER_TYPE, Query::default().filter("email", email.as_str()))
        .await?;
    let Some(user) = user else {
        return Err(HandlerError::Message {
            code: 404,
            message: "Unregistered email".to_string(),
        });
    };

    let password = request.password;
    let hashed = tokio::task::spawn_blocking(move || generate_password_hash(&password))
        .await
        .map_err(|err| HandlerError::Internal(err.to_string()))?;

    let ops = vec![
        WriteOp::UpdateById {
            id: user.id.ok_or(DbError::Unsaved)?,
            set: doc! {"password": hashed},
        },
        WriteOp::DeleteById { id: token.id.ok_or(DbError::Unsaved)? },
    ];
    call.store.execute(&ops).await?;

    Ok(Reply::Empty)
}

/// Install the auth feature on a model spec. The registry must also carry
/// [`PasswordResetToken::spec`] so the store can derive reset-token slugs.
pub fn register_auth(builder: ModelSpecBuilder) -> ModelSpecBuilder {
    builder
        .feature("IsAuth")
        .handler(
            HandlerBuilder::new("auth")
                .consumes::<Auth>()
                .produces("AuthToken")
                .describe("Authorizes email and password")
                .crash(CrashSpec::for_kind("Unauthorized"))
                .call(auth),
        )
        .handler(
            HandlerBuilder::new("forgot_password")
                .consumes::<ForgotPasswordRequest>()
                .produces("Ok")
                .describe("Sends a password recovery mail to the specified mail")
                .crash(CrashSpec::for_kind("NotFound"))
                .crash(CrashSpec::for_kind("AlreadyRequested"))
                .call(forgot_password),
        )
        .handler(
            HandlerBuilder::new("reset_password")
                .consumes::<ResetPassword>()
                .produces("Ok")
                .describe("Resets the password using the recovery code")
                .crash(CrashSpec::for_kind("NotFound"))
                .call(reset_password),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_token_node_shape() {
        let token = PasswordResetToken::new("garito@example.com");
        let code = token.code;
        let node = token.into_node();
        assert_eq!(node.type_name, RESET_TOKEN_TYPE);
        assert_eq!(node.path, "/");
        assert_eq!(node.str_field("email"), Some("garito@example.com"));
        assert_eq!(node.str_field("code"), Some(code.to_string().as_str()));
        assert!(node.fields.get_datetime("created_at").is_ok());
    }

    #[test]
    fn reset_token_slug_derives_from_email() {
        let spec = PasswordResetToken::spec();
        let node = PasswordResetToken::new("garito@example.com").into_node();
        let slug = spec.derive_slug(&node.fields);
        assert_eq!(slug.as_deref(), Some("garito-example-com"));
    }

    #[test]
    fn auth_feature_registers_the_three_handlers() {
        let spec = register_auth(ModelSpec::builder("Root")).build();
        assert_eq!(spec.features, vec!["IsAuth".to_string()]);
        for name in ["auth", "forgot_password", "reset_password"] {
            let handler = &spec.handlers[name];
            assert!(handler.consumes.is_some(), "{name} must consume a model");
        }
        assert_eq!(spec.handlers["auth"].produces, vec!["AuthToken".to_string()]);
        assert_eq!(spec.handlers["forgot_password"].can_crash.len(), 2);
    }
}
