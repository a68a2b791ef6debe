//! The storage layer.
//!
//! One MongoDB collection holds the whole tree as heterogeneous documents.
//! Structural mutations (rename/move, delete, create-child) are computed as
//! pure write plans first and then executed on a single session inside one
//! transaction, so the parent/child invariants are never observable in a
//! half-rewritten state.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::TryStreamExt;
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use mongodb::{Client, ClientSession, Collection};

use utils::url::{decompose, parent_url, parents};

use crate::error::DbError;
use crate::node::Node;
use crate::schema::{IndexMode, ModelRegistry, ModelSpec};

/// Addressing record for `get_one`/`get_many`: any combination of id, url,
/// path, slug, type, and arbitrary equality filters, plus an optional sort.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub id: Option<ObjectId>,
    pub url: Option<String>,
    pub path: Option<String>,
    pub slug: Option<String>,
    pub type_name: Option<String>,
    pub filters: Document,
    pub sort: Option<Document>,
}

impl Query {
    pub fn id(mut self, id: ObjectId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// Override the type filter `get_one`/`get_many` would inject.
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn filter(mut self, key: &str, value: impl Into<Bson>) -> Self {
        self.filters.insert(key, value.into());
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Build the filter document. A `url` decomposes into `(path, slug)`;
    /// `default_type` is injected unless the caller overrode it.
    pub fn to_filter(&self, default_type: Option<&str>) -> Document {
        let mut filter = self.filters.clone();
        if let Some(id) = self.id {
            filter.insert("_id", id);
        }
        if let Some(url) = &self.url {
            let parts = decompose(url);
            filter.insert("path", parts.path);
            if let Some(slug) = parts.slug {
                filter.insert("slug", slug);
            }
        }
        if let Some(path) = &self.path {
            filter.insert("path", path.as_str());
        }
        if let Some(slug) = &self.slug {
            filter.insert("slug", slug.as_str());
        }
        if let Some(type_name) = &self.type_name {
            filter.insert("type", type_name.as_str());
        } else if let Some(default_type) = default_type {
            if !filter.contains_key("type") {
                filter.insert("type", default_type);
            }
        }
        filter
    }
}

/// One write inside a transactional plan.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert(Document),
    UpdateById { id: ObjectId, set: Document },
    DeleteById { id: ObjectId },
    DeleteByPathPrefix { prefix: String },
}

#[derive(Clone)]
pub struct Store {
    client: Client,
    collection: Collection<Document>,
    registry: Arc<ModelRegistry>,
}

impl Store {
    pub fn new(client: Client, collection: Collection<Document>, registry: Arc<ModelRegistry>) -> Self {
        Store { client, collection, registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    /// Plain JSON projection honoring the type's declared exclusions.
    pub fn to_plain(&self, node: &Node) -> serde_json::Value {
        match self.registry.get(&node.type_name) {
            Some(spec) => node.to_plain(&spec.exclude),
            None => node.to_plain(&[]),
        }
    }

    /// Raw document lookup with no type injection (url resolution works over
    /// heterogeneous types).
    pub async fn find_doc(&self, query: Query) -> Result<Option<Document>, DbError> {
        let filter = query.to_filter(None);
        if let Some(sort) = query.sort {
            let mut cursor = self.collection.find(filter).sort(sort).limit(1).await?;
            Ok(cursor.try_next().await?)
        } else {
            Ok(self.collection.find_one(filter).await?)
        }
    }

    /// The unique matching node, or `None`. Injects the `type` filter unless
    /// the query overrides it; with a sort, the first in sort order.
    pub async fn get_one(&self, type_name: &str, query: Query) -> Result<Option<Node>, DbError> {
        let sort = query.sort.clone();
        let filter = query.to_filter(Some(type_name));
        let doc = if let Some(sort) = sort {
            let mut cursor = self.collection.find(filter).sort(sort).limit(1).await?;
            cursor.try_next().await?
        } else {
            self.collection.find_one(filter).await?
        };
        doc.map(Node::from_doc).transpose()
    }

    /// Every matching node, ordered by the query's sort when given.
    pub async fn get_many(&self, type_name: &str, query: Query) -> Result<Vec<Node>, DbError> {
        let sort = query.sort.clone();
        let filter = query.to_filter(Some(type_name));
        let mut find = self.collection.find(filter);
        if let Some(sort) = sort {
            find = find.sort(sort);
        }
        let docs: Vec<Document> = find.await?.try_collect().await?;
        docs.into_iter().map(Node::from_doc).collect()
    }

    /// Insert a node, deriving its slug when unset. Fails with
    /// `DuplicateKey` when `(path, slug)` collides.
    pub async fn create(&self, node: &mut Node) -> Result<(), DbError> {
        self.prepare(node)?;
        if node.id.is_none() {
            node.id = Some(ObjectId::new());
        }
        let url = node.url();
        self.collection
            .insert_one(node.to_doc())
            .await
            .map_err(|err| DbError::from_insert(err, &url))?;
        Ok(())
    }

    /// Apply `patch` to a node. Touching a sluger field re-derives the slug;
    /// when the url changes, every descendant path prefix is rewritten and
    /// the parent's child-list entry is replaced, all in one transaction.
    pub async fn update(&self, node: &mut Node, patch: Document) -> Result<(), DbError> {
        self.update_with(node, patch, "slug").await
    }

    pub async fn update_with(
        &self,
        node: &mut Node,
        mut patch: Document,
        indexer: &str,
    ) -> Result<(), DbError> {
        let id = node.id.ok_or(DbError::Unsaved)?;
        let spec = self.registry.expect(&node.type_name)?;

        if spec.sluger_fields.iter().any(|field| patch.contains_key(field)) {
            let mut merged = node.fields.clone();
            for (key, value) in patch.iter() {
                merged.insert(key, value.clone());
            }
            if let Some(slug) = spec.derive_slug(&merged) {
                patch.insert("slug", slug);
            }
        }

        let old_url = node.url();
        let new_path = patch.get_str("path").unwrap_or(&node.path).to_string();
        let new_slug = patch.get_str("slug").unwrap_or(&node.slug).to_string();
        let new_url = utils::url::get_url(&new_path, &new_slug);

        let mut descendants = Vec::new();
        let mut parent_fix = None;
        if new_url != old_url {
            descendants = self.descendants(&old_url).await?;
            if let Some(parent) = self.parent_of(node).await? {
                let parent_spec = self.registry.expect(&parent.type_name)?;
                let set = fixup_parent_lists(parent_spec, &parent, &node.type_name, &node.slug, &new_slug, indexer);
                if !set.is_empty() {
                    parent_fix = Some((parent.id.ok_or(DbError::Unsaved)?, set));
                }
            }
        }

        let ops = rename_plan(id, patch.clone(), &old_url, &new_url, &descendants, parent_fix);
        self.execute(&ops).await?;

        for (key, value) in patch {
            match key.as_str() {
                "path" => {
                    if let Bson::String(path) = value {
                        node.path = path;
                    }
                }
                "slug" => {
                    if let Bson::String(slug) = value {
                        node.slug = slug;
                    }
                }
                _ => {
                    node.fields.insert(key, value);
                }
            }
        }
        Ok(())
    }

    /// Delete the node, its whole subtree (path prefix match), and its entry
    /// in the parent's child-lists, in one transaction.
    pub async fn delete(&self, node: &mut Node) -> Result<(), DbError> {
        self.delete_with(node, "slug").await
    }

    pub async fn delete_with(&self, node: &mut Node, indexer: &str) -> Result<(), DbError> {
        let id = node.id.ok_or(DbError::Unsaved)?;

        let mut parent_fix = None;
        if let Some(parent) = self.parent_of(node).await? {
            let parent_spec = self.registry.expect(&parent.type_name)?;
            let set = drop_from_parent_lists(parent_spec, &parent, node, indexer);
            if !set.is_empty() {
                parent_fix = Some((parent.id.ok_or(DbError::Unsaved)?, set));
            }
        }

        let ops = delete_plan(id, &node.url(), parent_fix);
        self.execute(&ops).await?;
        node.id = None;
        Ok(())
    }

    /// Create `child` under `parent` and append it to the matching
    /// child-list, in one transaction.
    ///
    /// With no `as_` hint the child-list is chosen by the child's type; zero
    /// or several candidates fail with `ChildAmbiguity` naming them.
    pub async fn create_child(
        &self,
        parent: &mut Node,
        child: &mut Node,
        as_: Option<&str>,
        indexer: Option<&str>,
    ) -> Result<(), DbError> {
        let parent_id = parent.id.ok_or(DbError::Unsaved)?;
        let parent_spec = self.registry.expect(&parent.type_name)?;

        let chosen = match as_ {
            Some(name) => parent_spec
                .child_fields
                .iter()
                .find(|field| field.field == name)
                .ok_or_else(|| {
                    DbError::ChildAmbiguity(format!(
                        "{} ({}) has no child list `{name}`",
                        parent.type_name,
                        parent.label(),
                    ))
                })?,
            None => choose_child_field(parent_spec, parent.label(), &child.type_name)?,
        };
        let indexer = indexer.unwrap_or_else(|| chosen.mode.indexer());

        child.path = parent.url();
        self.prepare(child)?;
        if child.id.is_none() {
            child.id = Some(ObjectId::new());
        }

        let mut list = parent.list_field(&chosen.field);
        let entry = child
            .indexer(indexer)
            .ok_or_else(|| DbError::Malformed(format!("child has no `{indexer}` value")))?;
        list.push(entry);
        let mut set = Document::new();
        set.insert(chosen.field.as_str(), Bson::Array(list));

        let ops = vec![
            WriteOp::Insert(child.to_doc()),
            WriteOp::UpdateById { id: parent_id, set: set.clone() },
        ];
        self.execute(&ops).await?;

        for (key, value) in set {
            parent.fields.insert(key, value);
        }
        Ok(())
    }

    /// The ancestor chain in one `$or` query over the precomputed parent
    /// pairs: the immediate parent only, or the full chain root-first.
    pub async fn ancestors(&self, node: &Node, parent_only: bool) -> Result<Vec<Node>, DbError> {
        let url = node.url();
        if url == "/" {
            return Ok(Vec::new());
        }

        let mut pairs = parents(&url);
        if parent_only {
            pairs.truncate(1);
        }
        let branches: Vec<Document> = pairs
            .into_iter()
            .map(|pair| match pair.slug {
                Some(slug) => doc! {"path": pair.path, "slug": slug},
                None => doc! {"path": pair.path},
            })
            .collect();

        let docs: Vec<Document> = self
            .collection
            .find(doc! {"$or": branches})
            .sort(doc! {"path": -1})
            .await?
            .try_collect()
            .await?;

        let mut chain: Vec<Node> = docs
            .into_iter()
            .map(Node::from_doc)
            .collect::<Result<_, _>>()?;
        if !parent_only {
            chain.reverse();
        }
        Ok(chain)
    }

    async fn parent_of(&self, node: &Node) -> Result<Option<Node>, DbError> {
        Ok(self.ancestors(node, true).await?.into_iter().next())
    }

    /// Children per child-list field. Without a caller sort, results are
    /// re-ordered to the parent's declared order via `$indexOfArray`.
    pub async fn children(
        &self,
        node: &Node,
        sort: Option<Document>,
        extra: Option<Document>,
    ) -> Result<BTreeMap<String, Vec<Node>>, DbError> {
        let spec = self.registry.expect(&node.type_name)?;
        let url = node.url();

        let mut results = BTreeMap::new();
        for child_field in &spec.child_fields {
            let list = node.list_field(&child_field.field);
            let (mut match_doc, indexer_expr) = match child_field.mode {
                IndexMode::BySlug => (
                    doc! {"type": child_field.child_type.as_str(), "path": url.as_str()},
                    "$slug",
                ),
                IndexMode::ById => (doc! {"_id": {"$in": list.clone()}}, "$_id"),
            };
            if let Some(extra) = &extra {
                match_doc.extend(extra.clone());
            }

            let pipeline = match &sort {
                Some(sort) => vec![doc! {"$match": match_doc}, doc! {"$sort": sort.clone()}],
                None => vec![
                    doc! {"$match": match_doc},
                    doc! {"$addFields": {"__order": {"$indexOfArray": [Bson::Array(list), indexer_expr]}}},
                    doc! {"$sort": {"__order": 1}},
                ],
            };

            let mut cursor = self.collection.aggregate(pipeline).await?;
            let mut nodes = Vec::new();
            while let Some(mut doc) = cursor.try_next().await? {
                doc.remove("__order");
                nodes.push(Node::from_doc(doc)?);
            }
            results.insert(child_field.field.clone(), nodes);
        }
        Ok(results)
    }

    /// Resolve a url to a node, walking toward the root up to `tolerance`
    /// extra steps so a trailing member name can be recovered by the caller.
    pub async fn get_path(&self, url: &str, tolerance: u32) -> Result<Node, DbError> {
        if url == "/" {
            return self.root().await;
        }

        let mut current = url.to_string();
        let mut attempts = 0;
        loop {
            if let Some(doc) = self.find_doc(Query::default().url(current.clone())).await? {
                return Node::from_doc(doc);
            }

            attempts += 1;
            if attempts > tolerance {
                break;
            }
            match parent_url(&current) {
                Some(parent) if parent == "/" => return self.root().await,
                Some(parent) => current = parent,
                None => break,
            }
        }
        Err(DbError::NotFound(format!("{url} not found")))
    }

    /// The unique node with the empty path.
    pub async fn root(&self) -> Result<Node, DbError> {
        self.get_one(self.registry.root_name(), Query::default().path(""))
            .await?
            .ok_or_else(|| DbError::NotFound("/ not found".to_string()))
    }

    /// Derive identity ahead of insert: the slug from the sluger fields when
    /// it is still empty.
    fn prepare(&self, node: &mut Node) -> Result<(), DbError> {
        if node.slug.is_empty() {
            let spec = self.registry.expect(&node.type_name)?;
            match spec.derive_slug(&node.fields) {
                Some(slug) if !slug.is_empty() => node.slug = slug,
                _ => {
                    return Err(DbError::Malformed(format!(
                        "{} has no slug and no derivable sluger fields",
                        node.type_name
                    )));
                }
            }
        }
        Ok(())
    }

    async fn descendants(&self, url: &str) -> Result<Vec<(ObjectId, String)>, DbError> {
        let filter = doc! {"path": {"$regex": prefix_regex(url)}};
        let docs: Vec<Document> = self.collection.find(filter).await?.try_collect().await?;
        let mut found = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc
                .get_object_id("_id")
                .map_err(|_| DbError::Malformed("descendant without `_id`".into()))?;
            let path = doc
                .get_str("path")
                .map_err(|_| DbError::Malformed("descendant without `path`".into()))?;
            found.push((id, path.to_string()));
        }
        Ok(found)
    }

    /// Run a write plan on one session inside one transaction; aborted as a
    /// unit on any failure.
    pub(crate) async fn execute(&self, ops: &[WriteOp]) -> Result<(), DbError> {
        tracing::debug!(ops = ops.len(), "executing write plan");
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        match self.run_ops(ops, &mut session).await {
            Ok(()) => {
                session.commit_transaction().await?;
                Ok(())
            }
            Err(err) => {
                let _ = session.abort_transaction().await;
                Err(err)
            }
        }
    }

    async fn run_ops(&self, ops: &[WriteOp], session: &mut ClientSession) -> Result<(), DbError> {
        for op in ops {
            match op {
                WriteOp::Insert(doc) => {
                    let url = doc
                        .get_str("path")
                        .ok()
                        .zip(doc.get_str("slug").ok())
                        .map(|(path, slug)| utils::url::get_url(path, slug))
                        .unwrap_or_default();
                    self.collection
                        .insert_one(doc.clone())
                        .session(&mut *session)
                        .await
                        .map_err(|err| DbError::from_insert(err, &url))?;
                }
                WriteOp::UpdateById { id, set } => {
                    self.collection
                        .update_one(doc! {"_id": id}, doc! {"$set": set.clone()})
                        .session(&mut *session)
                        .await?;
                }
                WriteOp::DeleteById { id } => {
                    self.collection
                        .delete_one(doc! {"_id": id})
                        .session(&mut *session)
                        .await?;
                }
                WriteOp::DeleteByPathPrefix { prefix } => {
                    self.collection
                        .delete_many(doc! {"path": {"$regex": prefix_regex(prefix)}})
                        .session(&mut *session)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Anchored path-prefix matcher. The boundary alternation keeps `/a/bc`
/// out of `/a/b`'s subtree.
pub(crate) fn prefix_regex(prefix: &str) -> String {
    format!("^{}($|/)", regex::escape(prefix))
}

/// Rewrite the leading `old` prefix of `path` to `new`, once.
pub(crate) fn rewrite_prefix(path: &str, old: &str, new: &str) -> String {
    match path.strip_prefix(old) {
        Some(rest) => format!("{new}{rest}"),
        None => path.to_string(),
    }
}

/// The batched write for a rename/move: self patch first, then descendant
/// path rewrites, then the parent child-list fix-up.
pub(crate) fn rename_plan(
    id: ObjectId,
    patch: Document,
    old_url: &str,
    new_url: &str,
    descendants: &[(ObjectId, String)],
    parent_fix: Option<(ObjectId, Document)>,
) -> Vec<WriteOp> {
    let mut ops = vec![WriteOp::UpdateById { id, set: patch }];
    for (descendant_id, path) in descendants {
        ops.push(WriteOp::UpdateById {
            id: *descendant_id,
            set: doc! {"path": rewrite_prefix(path, old_url, new_url)},
        });
    }
    if let Some((parent_id, set)) = parent_fix {
        ops.push(WriteOp::UpdateById { id: parent_id, set });
    }
    ops
}

/// The batched write for a delete: self, the whole subtree, the parent
/// child-list fix-up.
pub(crate) fn delete_plan(
    id: ObjectId,
    url: &str,
    parent_fix: Option<(ObjectId, Document)>,
) -> Vec<WriteOp> {
    let mut ops = vec![
        WriteOp::DeleteById { id },
        WriteOp::DeleteByPathPrefix { prefix: url.to_string() },
    ];
    if let Some((parent_id, set)) = parent_fix {
        ops.push(WriteOp::UpdateById { id: parent_id, set });
    }
    ops
}

/// Replace the renamed child's entry in every matching child-list of the
/// parent. Id-indexed lists keep their entries (the id survives a rename).
pub(crate) fn fixup_parent_lists(
    parent_spec: &ModelSpec,
    parent: &Node,
    child_type: &str,
    old_slug: &str,
    new_slug: &str,
    indexer: &str,
) -> Document {
    let mut set = Document::new();
    if indexer != "slug" {
        return set;
    }
    for child_field in parent_spec.fields_for_child(child_type) {
        if child_field.mode == IndexMode::ById {
            continue;
        }
        let mut list = parent.list_field(&child_field.field);
        if let Some(position) = list
            .iter()
            .position(|entry| entry.as_str() == Some(old_slug))
        {
            list[position] = Bson::String(new_slug.to_string());
            set.insert(child_field.field.as_str(), Bson::Array(list));
        }
    }
    set
}

/// Drop the deleted child's entry from every matching child-list.
pub(crate) fn drop_from_parent_lists(
    parent_spec: &ModelSpec,
    parent: &Node,
    child: &Node,
    indexer: &str,
) -> Document {
    let mut set = Document::new();
    for child_field in parent_spec.fields_for_child(&child.type_name) {
        let key = match child_field.mode {
            IndexMode::ById => child.id.map(Bson::ObjectId),
            IndexMode::BySlug => child.indexer(indexer),
        };
        let Some(key) = key else { continue };
        let mut list = parent.list_field(&child_field.field);
        let before = list.len();
        list.retain(|entry| entry != &key);
        if list.len() != before {
            set.insert(child_field.field.as_str(), Bson::Array(list));
        }
    }
    set
}

/// Pick the unique child-list able to hold `child_type`, or fail naming the
/// candidates.
pub(crate) fn choose_child_field<'s>(
    parent_spec: &'s ModelSpec,
    parent_label: &str,
    child_type: &str,
) -> Result<&'s crate::schema::ChildField, DbError> {
    let candidates = parent_spec.fields_for_child(child_type);
    match candidates.as_slice() {
        [] => Err(DbError::ChildAmbiguity(format!(
            "{} ({parent_label}) can't store {child_type}",
            parent_spec.name
        ))),
        [only] => Ok(only),
        many => {
            let names: Vec<&str> = many.iter().map(|field| field.field.as_str()).collect();
            let (last, head) = names.split_last().expect("at least two candidates");
            Err(DbError::ChildAmbiguity(format!(
                "{} ({parent_label}) defines {} and {last} that can store {child_type}. \
                 Use `as` to disambiguate",
                parent_spec.name,
                head.join(", "),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_spec() -> ModelSpec {
        ModelSpec::builder("User")
            .child("tasks", "Task", IndexMode::BySlug)
            .child("projects", "Project", IndexMode::ById)
            .build()
    }

    fn ambiguous_spec() -> ModelSpec {
        ModelSpec::builder("User")
            .child("open_tasks", "Task", IndexMode::BySlug)
            .child("done_tasks", "Task", IndexMode::BySlug)
            .build()
    }

    fn parent_node() -> Node {
        let mut node = Node::new("User", "/", Document::new());
        node.id = Some(ObjectId::new());
        node.slug = "garito".into();
        node.fields.insert("name", "Garito");
        node.fields.insert("tasks", vec!["task-1", "task-2"]);
        node
    }

    #[test]
    fn query_filter_decomposes_url_and_injects_type() {
        let filter = Query::default().url("/garito/task-1").to_filter(Some("Task"));
        assert_eq!(filter, doc! {"path": "/garito", "slug": "task-1", "type": "Task"});
    }

    #[test]
    fn query_type_override_wins() {
        let filter = Query::default()
            .type_name("Permission")
            .filter("context", "Task")
            .to_filter(Some("Task"));
        assert_eq!(filter.get_str("type").unwrap(), "Permission");
        assert_eq!(filter.get_str("context").unwrap(), "Task");
    }

    #[test]
    fn rewrite_prefix_replaces_once_at_start() {
        assert_eq!(rewrite_prefix("/a/b/c", "/a/b", "/a/b2"), "/a/b2/c");
        assert_eq!(rewrite_prefix("/a/b/a/b", "/a/b", "/x"), "/x/a/b");
        assert_eq!(rewrite_prefix("/other", "/a/b", "/x"), "/other");
    }

    #[test]
    fn prefix_regex_escapes_and_bounds() {
        assert_eq!(prefix_regex("/a.b"), "^/a\\.b($|/)");
        let matcher = regex::Regex::new(&prefix_regex("/a/b")).unwrap();
        assert!(matcher.is_match("/a/b"));
        assert!(matcher.is_match("/a/b/c"));
        assert!(!matcher.is_match("/a/bc"));
    }

    #[test]
    fn rename_plan_orders_self_descendants_parent() {
        let id = ObjectId::new();
        let child_id = ObjectId::new();
        let parent_id = ObjectId::new();
        let ops = rename_plan(
            id,
            doc! {"name": "B2", "slug": "b2"},
            "/a/b",
            "/a/b2",
            &[(child_id, "/a/b".to_string())],
            Some((parent_id, doc! {"tasks": ["b2"]})),
        );
        assert_eq!(
            ops,
            vec![
                WriteOp::UpdateById { id, set: doc! {"name": "B2", "slug": "b2"} },
                WriteOp::UpdateById { id: child_id, set: doc! {"path": "/a/b2"} },
                WriteOp::UpdateById { id: parent_id, set: doc! {"tasks": ["b2"]} },
            ]
        );
    }

    #[test]
    fn delete_plan_covers_subtree_and_parent() {
        let id = ObjectId::new();
        let parent_id = ObjectId::new();
        let ops = delete_plan(id, "/a/b", Some((parent_id, doc! {"tasks": []})));
        assert_eq!(
            ops,
            vec![
                WriteOp::DeleteById { id },
                WriteOp::DeleteByPathPrefix { prefix: "/a/b".to_string() },
                WriteOp::UpdateById { id: parent_id, set: doc! {"tasks": []} },
            ]
        );
    }

    #[test]
    fn parent_fixup_replaces_the_slug_entry() {
        let spec = user_spec();
        let parent = parent_node();
        let set = fixup_parent_lists(&spec, &parent, "Task", "task-1", "task-one", "slug");
        assert_eq!(set, doc! {"tasks": ["task-one", "task-2"]});
    }

    #[test]
    fn parent_fixup_skips_id_indexed_lists() {
        let spec = user_spec();
        let mut parent = parent_node();
        parent.fields.insert("projects", vec![ObjectId::new()]);
        let set = fixup_parent_lists(&spec, &parent, "Project", "p", "p2", "slug");
        assert!(set.is_empty());
    }

    #[test]
    fn parent_drop_removes_the_entry() {
        let spec = user_spec();
        let parent = parent_node();
        let mut child = Node::new("Task", "/garito", Document::new());
        child.slug = "task-2".into();
        child.id = Some(ObjectId::new());
        let set = drop_from_parent_lists(&spec, &parent, &child, "slug");
        assert_eq!(set, doc! {"tasks": ["task-1"]});
    }

    #[test]
    fn choosing_among_two_candidates_enumerates_them() {
        let spec = ambiguous_spec();
        let err = choose_child_field(&spec, "Garito", "Task").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("open_tasks"));
        assert!(message.contains("done_tasks"));
        assert!(message.contains("Use `as` to disambiguate"));
    }

    #[test]
    fn choosing_with_no_candidate_fails() {
        let spec = user_spec();
        let err = choose_child_field(&spec, "Garito", "Group").unwrap_err();
        assert!(err.to_string().contains("can't store Group"));
    }

    #[test]
    fn choosing_the_unique_candidate_succeeds() {
        let spec = user_spec();
        let field = choose_child_field(&spec, "Garito", "Task").unwrap();
        assert_eq!(field.field, "tasks");
        assert_eq!(field.mode, IndexMode::BySlug);
    }
}
