//! The stored tree element.
//!
//! Every document in the collection is a `Node`: the common identity fields
//! (`_id`, `type`, `path`, `slug`) plus the type-specific fields kept as a
//! raw BSON document. Reconstruction dispatches on the stored `type` through
//! the model registry, so heterogeneous query results come back as plain
//! `Node`s tagged with their type name.

use mongodb::bson::{Bson, Document, oid::ObjectId};
use serde_json::{Map, Value};

use utils::url::get_url;

use crate::error::DbError;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: Option<ObjectId>,
    pub type_name: String,
    pub path: String,
    pub slug: String,
    /// Type-specific fields, child lists included. Never contains the
    /// identity keys.
    pub fields: Document,
}

impl Node {
    pub fn new(type_name: impl Into<String>, path: impl Into<String>, fields: Document) -> Self {
        Node {
            id: None,
            type_name: type_name.into(),
            path: path.into(),
            slug: String::new(),
            fields,
        }
    }

    pub fn url(&self) -> String {
        get_url(&self.path, &self.slug)
    }

    /// Rebuild a node from a stored document.
    pub fn from_doc(mut doc: Document) -> Result<Self, DbError> {
        let id = doc.remove("_id").as_ref().and_then(Bson::as_object_id);
        let type_name = doc
            .remove("type")
            .as_ref()
            .and_then(Bson::as_str)
            .map(str::to_string)
            .ok_or_else(|| DbError::Malformed("missing `type`".into()))?;
        let path = doc
            .remove("path")
            .as_ref()
            .and_then(Bson::as_str)
            .map(str::to_string)
            .ok_or_else(|| DbError::Malformed("missing `path`".into()))?;
        let slug = doc
            .remove("slug")
            .as_ref()
            .and_then(Bson::as_str)
            .map(str::to_string)
            .ok_or_else(|| DbError::Malformed("missing `slug`".into()))?;

        Ok(Node { id, type_name, path, slug, fields: doc })
    }

    /// Assemble the stored representation.
    pub fn to_doc(&self) -> Document {
        let mut doc = Document::new();
        if let Some(id) = self.id {
            doc.insert("_id", id);
        }
        doc.insert("type", self.type_name.as_str());
        doc.insert("path", self.path.as_str());
        doc.insert("slug", self.slug.as_str());
        for (key, value) in &self.fields {
            doc.insert(key, value.clone());
        }
        doc
    }

    /// The value a parent child-list holds for this node under `indexer`
    /// (`"slug"` or `"_id"`).
    pub fn indexer(&self, indexer: &str) -> Option<Bson> {
        match indexer {
            "_id" => self.id.map(Bson::ObjectId),
            "slug" => Some(Bson::String(self.slug.clone())),
            other => self.fields.get(other).cloned(),
        }
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Bson::as_str)
    }

    /// A child-list field as a vector; missing or non-array fields read as
    /// empty.
    pub fn list_field(&self, name: &str) -> Vec<Bson> {
        match self.fields.get(name) {
            Some(Bson::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Human label for error messages: the `name` field when present, the
    /// slug otherwise.
    pub fn label(&self) -> &str {
        self.str_field("name").unwrap_or(&self.slug)
    }

    /// JSON projection for response bodies: identity fields plus the
    /// type-specific fields, minus the registry-declared exclusions.
    pub fn to_plain(&self, exclude: &[String]) -> Value {
        let mut map = Map::new();
        if let Some(id) = self.id {
            map.insert("_id".into(), Value::String(id.to_hex()));
        }
        map.insert("type".into(), Value::String(self.type_name.clone()));
        map.insert("path".into(), Value::String(self.path.clone()));
        map.insert("slug".into(), Value::String(self.slug.clone()));
        for (key, value) in &self.fields {
            if exclude.iter().any(|e| e == key) {
                continue;
            }
            map.insert(key.clone(), bson_to_plain(value));
        }
        Value::Object(map)
    }
}

/// BSON to wire JSON: object ids become hex strings, datetimes RFC 3339.
pub fn bson_to_plain(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(dt) => match dt.try_to_rfc3339_string() {
            Ok(formatted) => Value::String(formatted),
            Err(_) => Value::Null,
        },
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_plain).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(key, value)| (key.clone(), bson_to_plain(value)))
                .collect(),
        ),
        other => other.clone().into_relaxed_extjson(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn task_doc(id: ObjectId) -> Document {
        doc! {
            "_id": id,
            "type": "Task",
            "path": "/garito",
            "slug": "task-1",
            "name": "Task 1",
            "tasks": ["task-1-1"],
        }
    }

    #[test]
    fn doc_round_trip() {
        let id = ObjectId::new();
        let node = Node::from_doc(task_doc(id)).unwrap();
        assert_eq!(node.id, Some(id));
        assert_eq!(node.type_name, "Task");
        assert_eq!(node.url(), "/garito/task-1");
        assert_eq!(node.str_field("name"), Some("Task 1"));
        assert_eq!(node.to_doc(), task_doc(id));
    }

    #[test]
    fn missing_identity_is_malformed() {
        let err = Node::from_doc(doc! {"path": "/", "slug": "x"}).unwrap_err();
        assert!(matches!(err, DbError::Malformed(_)));
    }

    #[test]
    fn indexer_values() {
        let id = ObjectId::new();
        let node = Node::from_doc(task_doc(id)).unwrap();
        assert_eq!(node.indexer("slug"), Some(Bson::String("task-1".into())));
        assert_eq!(node.indexer("_id"), Some(Bson::ObjectId(id)));
    }

    #[test]
    fn plain_projection_excludes_and_stringifies() {
        let id = ObjectId::new();
        let mut node = Node::from_doc(task_doc(id)).unwrap();
        node.fields.insert("password", "pbkdf2:sha256:…");
        let plain = node.to_plain(&["password".to_string()]);
        assert_eq!(plain["_id"], Value::String(id.to_hex()));
        assert_eq!(plain["slug"], Value::String("task-1".into()));
        assert!(plain.get("password").is_none());
        assert_eq!(plain["tasks"][0], Value::String("task-1-1".into()));
    }
}
