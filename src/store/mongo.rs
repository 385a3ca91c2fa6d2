//! MongoDB-backed Key Store — the production adapter.
//!
//! One document per key in a single collection, matching the §3 data model
//! field-for-field. `try_reserve` is the only place correctness depends on
//! the store: its filter pins every counter field and `status` to the values
//! the engine observed in its snapshot, so `find_one_and_update` applies iff
//! nothing else has touched the document since.

use async_trait::async_trait;
use bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use crate::domain::key::{Key, KeyStatus};
use crate::error::{BrokerError, Result};

use super::{KeyStore, PlanUpdate, ReservationCas, SweepUpdate};

/// Wire representation. Identical to `Key` but kept as its own type so a
/// schema change on one side doesn't silently ripple into the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyDoc {
    #[serde(rename = "_id")]
    subscription_id: String,
    plan: crate::domain::plan::Plan,
    status: KeyStatus,
    window_limit: u32,
    daily_limit: u32,
    avg_interval_ms: u64,
    used_in_window: u32,
    window_start: i64,
    used_daily: u32,
    day_start: i64,
    last_used: i64,
}

impl From<Key> for KeyDoc {
    fn from(k: Key) -> Self {
        KeyDoc {
            subscription_id: k.subscription_id,
            plan: k.plan,
            status: k.status,
            window_limit: k.window_limit,
            daily_limit: k.daily_limit,
            avg_interval_ms: k.avg_interval_ms,
            used_in_window: k.used_in_window,
            window_start: k.window_start,
            used_daily: k.used_daily,
            day_start: k.day_start,
            last_used: k.last_used,
        }
    }
}

impl From<KeyDoc> for Key {
    fn from(d: KeyDoc) -> Self {
        Key {
            subscription_id: d.subscription_id,
            plan: d.plan,
            status: d.status,
            window_limit: d.window_limit,
            daily_limit: d.daily_limit,
            avg_interval_ms: d.avg_interval_ms,
            used_in_window: d.used_in_window,
            window_start: d.window_start,
            used_daily: d.used_daily,
            day_start: d.day_start,
            last_used: d.last_used,
        }
    }
}

pub struct MongoKeyStore {
    collection: Collection<KeyDoc>,
}

impl MongoKeyStore {
    pub async fn connect(uri: &str, db_name: &str) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let collection = client.database(db_name).collection::<KeyDoc>("keys");

        // `_id` is already the unique index MongoDB maintains automatically;
        // this just makes the intent explicit and is a no-op if it exists.
        let index = IndexModel::builder().keys(doc! { "_id": 1 }).build();
        let _ = collection.create_index(index, None).await;

        Ok(Self { collection })
    }

    fn transient(err: mongodb::error::Error) -> BrokerError {
        BrokerError::StoreTransient(err.to_string())
    }
}

fn status_str(status: KeyStatus) -> &'static str {
    match status {
        KeyStatus::Active => "active",
        KeyStatus::Exhausted => "exhausted",
        KeyStatus::Banned => "banned",
    }
}

#[async_trait]
impl KeyStore for MongoKeyStore {
    async fn find_all(&self) -> Result<Vec<Key>> {
        use futures_util::TryStreamExt;

        let mut cursor = self
            .collection
            .find(None, None)
            .await
            .map_err(Self::transient)?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(Self::transient)? {
            out.push(doc.into());
        }
        Ok(out)
    }

    async fn find_one(&self, subscription_id: &str) -> Result<Option<Key>> {
        let doc = self
            .collection
            .find_one(doc! { "_id": subscription_id }, None)
            .await
            .map_err(Self::transient)?;
        Ok(doc.map(Into::into))
    }

    async fn insert_one(&self, key: Key) -> Result<()> {
        self.collection
            .insert_one(KeyDoc::from(key), None)
            .await
            .map_err(Self::transient)?;
        Ok(())
    }

    async fn apply_plan_update(&self, subscription_id: &str, update: PlanUpdate) -> Result<u64> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": subscription_id },
                doc! { "$set": {
                    "plan": update.plan.as_str(),
                    "window_limit": update.window_limit as i64,
                    "daily_limit": update.daily_limit as i64,
                    "avg_interval_ms": update.avg_interval_ms as i64,
                }},
                None,
            )
            .await
            .map_err(Self::transient)?;
        Ok(result.matched_count)
    }

    async fn apply_sweep(&self, subscription_id: &str, update: SweepUpdate) -> Result<u64> {
        let mut set = doc! {};
        if let Some(v) = update.used_in_window {
            set.insert("used_in_window", v as i64);
        }
        if let Some(v) = update.window_start {
            set.insert("window_start", v);
        }
        if let Some(v) = update.used_daily {
            set.insert("used_daily", v as i64);
        }
        if let Some(v) = update.day_start {
            set.insert("day_start", v);
        }
        if let Some(status) = update.status {
            set.insert("status", status_str(status));
        }
        if set.is_empty() {
            return Ok(0);
        }

        let result = self
            .collection
            .update_one(doc! { "_id": subscription_id }, doc! { "$set": set }, None)
            .await
            .map_err(Self::transient)?;
        Ok(result.matched_count)
    }

    async fn try_reserve(&self, cas: &ReservationCas) -> Result<bool> {
        let filter = doc! {
            "_id": &cas.subscription_id,
            "used_in_window": cas.expect_used_in_window as i64,
            "window_start": cas.expect_window_start,
            "used_daily": cas.expect_used_daily as i64,
            "day_start": cas.expect_day_start,
            "status": status_str(cas.expect_status),
        };
        let update = doc! { "$set": {
            "used_in_window": cas.new_used_in_window as i64,
            "window_start": cas.new_window_start,
            "used_daily": cas.new_used_daily as i64,
            "day_start": cas.new_day_start,
            "last_used": cas.new_last_used,
            "status": status_str(cas.new_status),
        }};

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let post_image = self
            .collection
            .find_one_and_update(filter, update, options)
            .await
            .map_err(Self::transient)?;

        Ok(post_image.is_some())
    }

    async fn delete_one(&self, subscription_id: &str) -> Result<bool> {
        let result = self
            .collection
            .delete_one(doc! { "_id": subscription_id }, None)
            .await
            .map_err(Self::transient)?;
        Ok(result.deleted_count > 0)
    }
}
