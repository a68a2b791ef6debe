//! Connection bootstrap.
//!
//! One collection of heterogeneous documents. Connect-time setup creates the
//! indexes the invariants rely on: the unique `(path, slug)` pair, the TTL
//! expiry for password-reset tokens, and an ascending `type` index.

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::{Document, doc};
use mongodb::gridfs::GridFsBucket;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};

use crate::error::DbError;
use crate::schema::ModelRegistry;
use crate::store::Store;

/// Seconds a password-reset token survives before the store expires it.
pub const RESET_TOKEN_TTL_SECS: u64 = 1_800;

#[derive(Clone)]
pub struct DbService {
    pub client: Client,
    pub collection: Collection<Document>,
    pub gridfs: Option<GridFsBucket>,
}

impl DbService {
    pub async fn connect(
        uri: &str,
        db: &str,
        table: Option<&str>,
        gridfs: bool,
    ) -> Result<DbService, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let database = client.database(db);
        let collection = database.collection::<Document>(table.unwrap_or(db));

        collection
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"path": 1, "slug": 1})
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        collection
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"created_at": 1})
                    .options(
                        IndexOptions::builder()
                            .expire_after(Duration::from_secs(RESET_TOKEN_TTL_SECS))
                            .build(),
                    )
                    .build(),
            )
            .await?;
        collection
            .create_index(IndexModel::builder().keys(doc! {"type": 1}).build())
            .await?;

        let gridfs = gridfs.then(|| database.gridfs_bucket(None));

        Ok(DbService { client, collection, gridfs })
    }

    pub fn store(&self, registry: Arc<ModelRegistry>) -> Store {
        Store::new(self.client.clone(), self.collection.clone(), registry)
    }
}
