//! Permission records and the evaluation seam.
//!
//! A permission is a stored document keyed by `(context, name)`: the type of
//! the addressed node and the handler being called (`call` stands in for
//! `index`). How a rule judges an actor is the embedding application's
//! business; the framework only looks the rule up and delegates to the
//! injected gate. No matching rule means the call is not authorized.

use async_trait::async_trait;

use crate::error::DbError;
use crate::node::Node;
use crate::store::{Query, Store};

pub const PERMISSION_TYPE: &str = "Permission";

/// Evaluates a stored rule against the actor and the addressed node.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn allows(&self, rule: &Node, actor: Option<&Node>, node: &Node) -> bool;
}

/// The permission name a member resolves to.
pub fn permission_name(member: &str) -> &str {
    if member == "index" { "call" } else { member }
}

/// Look up the rule for `(context, name)`.
pub async fn lookup(store: &Store, context: &str, name: &str) -> Result<Option<Node>, DbError> {
    store
        .get_one(
            PERMISSION_TYPE,
            Query::default().filter("context", context).filter("name", name),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_maps_to_call() {
        assert_eq!(permission_name("index"), "call");
        assert_eq!(permission_name("update"), "update");
        assert_eq!(permission_name("forgot_password"), "forgot_password");
    }
}
