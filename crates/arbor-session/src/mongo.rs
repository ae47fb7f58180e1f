//! MongoDB implementations of the persistence traits.
//!
//! Domain records are mirrored into persistence documents at this boundary
//! (BSON dates, string ids) so the wire types stay free of driver details.
//! All lifecycle behavior lives in these repository functions; the documents
//! themselves are plain data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{Bson, DateTime as BsonDateTime, doc};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::info;
use uuid::Uuid;

use arbor_core::{CanvasId, ConversationId, NodeId, SessionId, UserId, UserInfo};

use crate::error::{SessionError, SessionResult};
use crate::records::{
    Activity, ActivityFilter, ActivityPriority, ActivityType, EditingSession, EditingTargetKind,
};
use crate::store::{ActivityStore, SessionStore};

const SESSIONS_COLLECTION: &str = "editing_sessions";
const ACTIVITIES_COLLECTION: &str = "activities";

/// Sessions idle past this are removed by the collection's TTL index; the
/// periodic cleanup deactivates them long before that.
const SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Connect and build both stores, creating indexes.
///
/// # Errors
///
/// Returns [`SessionError::Connection`] when the server is unreachable or
/// index creation fails.
pub async fn connect(
    url: &str,
    database: &str,
) -> SessionResult<(MongoSessionStore, MongoActivityStore)> {
    let client = Client::with_uri_str(url)
        .await
        .map_err(|e| SessionError::Connection(e.to_string()))?;
    let db = client.database(database);

    let sessions = MongoSessionStore::new(&db);
    let activities = MongoActivityStore::new(&db);
    sessions.ensure_indexes().await?;
    activities.ensure_indexes().await?;
    info!(url, database, "connected to durable store");
    Ok((sessions, activities))
}

// ---------------------------------------------------------------------------
// Persistence documents
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDoc {
    session_id: String,
    user_id: String,
    user: UserInfo,
    canvas_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    editing_type: EditingTargetKind,
    editing_target: String,
    started_at: BsonDateTime,
    last_activity_at: BsonDateTime,
    is_active: bool,
    has_lock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_expiry: Option<BsonDateTime>,
    version: i64,
}

impl From<&EditingSession> for SessionDoc {
    fn from(session: &EditingSession) -> Self {
        Self {
            session_id: session.session_id.to_string(),
            user_id: session.user_id.to_string(),
            user: session.user.clone(),
            canvas_id: session.canvas_id.to_string(),
            conversation_id: session.conversation_id.as_ref().map(ToString::to_string),
            node_id: session.node_id.as_ref().map(ToString::to_string),
            editing_type: session.editing_type,
            editing_target: session.editing_target.clone(),
            started_at: BsonDateTime::from_chrono(session.started_at),
            last_activity_at: BsonDateTime::from_chrono(session.last_activity_at),
            is_active: session.is_active,
            has_lock: session.has_lock,
            lock_expiry: session.lock_expiry.map(BsonDateTime::from_chrono),
            version: i64::try_from(session.version).unwrap_or(i64::MAX),
        }
    }
}

impl TryFrom<SessionDoc> for EditingSession {
    type Error = SessionError;

    fn try_from(doc: SessionDoc) -> Result<Self, Self::Error> {
        let uuid = Uuid::parse_str(&doc.session_id)
            .map_err(|e| SessionError::Serialization(format!("bad session id: {e}")))?;
        Ok(Self {
            session_id: SessionId::from_uuid(uuid),
            user_id: UserId::new(doc.user_id),
            user: doc.user,
            canvas_id: CanvasId::new(doc.canvas_id),
            conversation_id: doc.conversation_id.map(ConversationId::new),
            node_id: doc.node_id.map(NodeId::new),
            editing_type: doc.editing_type,
            editing_target: doc.editing_target,
            started_at: doc.started_at.to_chrono(),
            last_activity_at: doc.last_activity_at.to_chrono(),
            is_active: doc.is_active,
            has_lock: doc.has_lock,
            lock_expiry: doc.lock_expiry.map(BsonDateTime::to_chrono),
            version: u64::try_from(doc.version).unwrap_or(0),
        })
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityDoc {
    id: String,
    canvas_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    user_id: String,
    user_name: String,
    #[serde(rename = "type")]
    activity_type: ActivityType,
    description: String,
    priority: ActivityPriority,
    metadata: serde_json::Value,
    timestamp: BsonDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<String>,
}

impl From<&Activity> for ActivityDoc {
    fn from(activity: &Activity) -> Self {
        Self {
            id: activity.id.to_string(),
            canvas_id: activity.canvas_id.to_string(),
            conversation_id: activity.conversation_id.as_ref().map(ToString::to_string),
            node_id: activity.node_id.as_ref().map(ToString::to_string),
            user_id: activity.user_id.to_string(),
            user_name: activity.user_name.clone(),
            activity_type: activity.activity_type,
            description: activity.description.clone(),
            priority: activity.priority,
            metadata: activity.metadata.clone(),
            timestamp: BsonDateTime::from_chrono(activity.timestamp),
            batch_id: activity.batch_id.map(|id| id.to_string()),
        }
    }
}

impl TryFrom<ActivityDoc> for Activity {
    type Error = SessionError;

    fn try_from(doc: ActivityDoc) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&doc.id)
            .map_err(|e| SessionError::Serialization(format!("bad activity id: {e}")))?;
        let batch_id = doc
            .batch_id
            .map(|raw| {
                Uuid::parse_str(&raw)
                    .map_err(|e| SessionError::Serialization(format!("bad batch id: {e}")))
            })
            .transpose()?;
        Ok(Self {
            id,
            canvas_id: CanvasId::new(doc.canvas_id),
            conversation_id: doc.conversation_id.map(ConversationId::new),
            node_id: doc.node_id.map(NodeId::new),
            user_id: UserId::new(doc.user_id),
            user_name: doc.user_name,
            activity_type: doc.activity_type,
            description: doc.description,
            priority: doc.priority,
            metadata: doc.metadata,
            timestamp: doc.timestamp.to_chrono(),
            batch_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// MongoDB-backed session store.
#[derive(Debug, Clone)]
pub struct MongoSessionStore {
    collection: Collection<SessionDoc>,
    database: Database,
}

impl MongoSessionStore {
    /// Build over an existing database handle.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(SESSIONS_COLLECTION),
            database: db.clone(),
        }
    }

    /// Create the TTL and lookup indexes this store relies on.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when index creation fails.
    pub async fn ensure_indexes(&self) -> SessionResult<()> {
        let ttl = IndexModel::builder()
            .keys(doc! { "lastActivityAt": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(std::time::Duration::from_secs(SESSION_TTL_SECS))
                    .build(),
            )
            .build();
        let target = IndexModel::builder()
            .keys(doc! { "editingTarget": 1, "isActive": 1 })
            .build();
        let session_id = IndexModel::builder()
            .keys(doc! { "sessionId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(ttl, None).await?;
        self.collection.create_index(target, None).await?;
        self.collection.create_index(session_id, None).await?;
        Ok(())
    }

    async fn update_returning(
        &self,
        filter: mongodb::bson::Document,
        update: mongodb::bson::Document,
    ) -> SessionResult<Option<EditingSession>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .collection
            .find_one_and_update(filter, update, options)
            .await?;
        updated.map(EditingSession::try_from).transpose()
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn create(&self, session: EditingSession) -> SessionResult<EditingSession> {
        self.collection
            .insert_one(SessionDoc::from(&session), None)
            .await?;
        Ok(session)
    }

    async fn get(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>> {
        let doc = self
            .collection
            .find_one(doc! { "sessionId": session_id.to_string() }, None)
            .await?;
        doc.map(EditingSession::try_from).transpose()
    }

    async fn touch(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>> {
        self.update_returning(
            doc! { "sessionId": session_id.to_string(), "isActive": true },
            doc! {
                "$set": { "lastActivityAt": BsonDateTime::from_chrono(Utc::now()) },
                "$inc": { "version": 1 },
            },
        )
        .await
    }

    async fn end(&self, session_id: &SessionId) -> SessionResult<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "sessionId": session_id.to_string(), "isActive": true },
                doc! {
                    "$set": {
                        "isActive": false,
                        "hasLock": false,
                        "lastActivityAt": BsonDateTime::from_chrono(Utc::now()),
                    },
                    "$unset": { "lockExpiry": "" },
                    "$inc": { "version": 1 },
                },
                None,
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn set_lock(
        &self,
        session_id: &SessionId,
        expiry: DateTime<Utc>,
    ) -> SessionResult<Option<EditingSession>> {
        self.update_returning(
            doc! { "sessionId": session_id.to_string(), "isActive": true },
            doc! {
                "$set": {
                    "hasLock": true,
                    "lockExpiry": BsonDateTime::from_chrono(expiry),
                    "lastActivityAt": BsonDateTime::from_chrono(Utc::now()),
                },
                "$inc": { "version": 1 },
            },
        )
        .await
    }

    async fn clear_lock(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>> {
        self.update_returning(
            doc! { "sessionId": session_id.to_string() },
            doc! {
                "$set": {
                    "hasLock": false,
                    "lastActivityAt": BsonDateTime::from_chrono(Utc::now()),
                },
                "$unset": { "lockExpiry": "" },
                "$inc": { "version": 1 },
            },
        )
        .await
    }

    async fn find_lock_conflict(
        &self,
        editing_target: &str,
        now: DateTime<Utc>,
        exclude: &SessionId,
    ) -> SessionResult<Option<EditingSession>> {
        let doc = self
            .collection
            .find_one(
                doc! {
                    "editingTarget": editing_target,
                    "isActive": true,
                    "hasLock": true,
                    "lockExpiry": { "$gt": BsonDateTime::from_chrono(now) },
                    "sessionId": { "$ne": exclude.to_string() },
                },
                None,
            )
            .await?;
        doc.map(EditingSession::try_from).transpose()
    }

    async fn active_for_canvas(&self, canvas_id: &CanvasId) -> SessionResult<Vec<EditingSession>> {
        let mut cursor = self
            .collection
            .find(
                doc! { "canvasId": canvas_id.to_string(), "isActive": true },
                None,
            )
            .await?;
        let mut sessions = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            sessions.push(EditingSession::try_from(doc)?);
        }
        Ok(sessions)
    }

    async fn deactivate_stale(&self, idle_cutoff: DateTime<Utc>) -> SessionResult<u64> {
        let now = Utc::now();
        let result = self
            .collection
            .update_many(
                doc! {
                    "isActive": true,
                    "$or": [
                        { "lastActivityAt": { "$lt": BsonDateTime::from_chrono(idle_cutoff) } },
                        { "hasLock": true, "lockExpiry": { "$lt": BsonDateTime::from_chrono(now) } },
                    ],
                },
                doc! {
                    "$set": { "isActive": false, "hasLock": false },
                    "$unset": { "lockExpiry": "" },
                    "$inc": { "version": 1 },
                },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn clear_expired_locks(&self, now: DateTime<Utc>) -> SessionResult<u64> {
        let result = self
            .collection
            .update_many(
                doc! {
                    "hasLock": true,
                    "lockExpiry": { "$lt": BsonDateTime::from_chrono(now) },
                },
                doc! {
                    "$set": { "hasLock": false },
                    "$unset": { "lockExpiry": "" },
                    "$inc": { "version": 1 },
                },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn ping(&self) -> SessionResult<()> {
        self.database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Activity store
// ---------------------------------------------------------------------------

/// MongoDB-backed activity store.
#[derive(Debug, Clone)]
pub struct MongoActivityStore {
    collection: Collection<ActivityDoc>,
}

impl MongoActivityStore {
    /// Build over an existing database handle.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(ACTIVITIES_COLLECTION),
        }
    }

    /// Create the feed-query indexes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when index creation fails.
    pub async fn ensure_indexes(&self) -> SessionResult<()> {
        let feed = IndexModel::builder()
            .keys(doc! { "canvasId": 1, "timestamp": -1 })
            .build();
        let by_user = IndexModel::builder()
            .keys(doc! { "userId": 1, "timestamp": -1 })
            .build();
        self.collection.create_index(feed, None).await?;
        self.collection.create_index(by_user, None).await?;
        Ok(())
    }

    fn filter_document(filter: &ActivityFilter) -> mongodb::bson::Document {
        let mut query = doc! {};
        if let Some(canvas) = &filter.canvas_id {
            query.insert("canvasId", canvas.to_string());
        }
        if let Some(conversation) = &filter.conversation_id {
            query.insert("conversationId", conversation.to_string());
        }
        if let Some(user) = &filter.user_id {
            query.insert("userId", user.to_string());
        }
        if let Some(types) = &filter.activity_types {
            let names: Vec<Bson> = types
                .iter()
                .map(|t| Bson::String(t.as_str().to_string()))
                .collect();
            query.insert("type", doc! { "$in": names });
        }
        let mut window = doc! {};
        if let Some(start) = filter.start_date {
            window.insert("$gte", BsonDateTime::from_chrono(start));
        }
        if let Some(end) = filter.end_date {
            window.insert("$lte", BsonDateTime::from_chrono(end));
        }
        if !window.is_empty() {
            query.insert("timestamp", window);
        }
        query
    }
}

#[async_trait]
impl ActivityStore for MongoActivityStore {
    async fn insert(&self, activity: Activity) -> SessionResult<Activity> {
        self.collection
            .insert_one(ActivityDoc::from(&activity), None)
            .await?;
        Ok(activity)
    }

    async fn query(&self, filter: &ActivityFilter) -> SessionResult<Vec<Activity>> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .skip(u64::try_from(filter.offset).unwrap_or(u64::MAX))
            .limit(filter.limit.and_then(|l| i64::try_from(l).ok()))
            .build();
        let mut cursor = self
            .collection
            .find(Self::filter_document(filter), options)
            .await?;
        let mut activities = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            activities.push(Activity::try_from(doc)?);
        }
        Ok(activities)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> SessionResult<u64> {
        let result = self
            .collection
            .delete_many(
                doc! { "timestamp": { "$lt": BsonDateTime::from_chrono(cutoff) } },
                None,
            )
            .await?;
        Ok(result.deleted_count)
    }
}
