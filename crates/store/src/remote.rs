use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::watch;

use haru_entry::{DiaryEntry, HappinessAnalysis, Normalizer};

use crate::error::StoreError;
use crate::session::Session;
use crate::{EntryStore, sort_newest_first};

/// Collection of per-day entries under each user's namespace.
const ENTRIES_COLLECTION: &str = "diary_entries";
/// Sibling collection holding at most one analysis document per user.
const ANALYSIS_COLLECTION: &str = "diary_entries_analysis";

/// Remote backend: each entry is an individually addressable document in a
/// Firestore-style REST document store, scoped under
/// `users/{uid}/diary_entries`. The document id assigned by the backend is
/// the real update/delete key; `date` is a lookup field.
///
/// All requests carry the session's bearer token; a session without one
/// fails with [`StoreError::Unauthenticated`] before any request is sent.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    normalizer: Normalizer,
    poll_interval: Duration,
}

impl RemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        normalizer: Normalizer,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            project_id: project_id.into(),
            normalizer,
            poll_interval,
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }

    fn collection_url(&self, user_id: &str, collection: &str) -> String {
        format!("{}/users/{user_id}/{collection}", self.documents_root())
    }

    fn document_url(&self, user_id: &str, collection: &str, id: &str) -> String {
        format!("{}/{id}", self.collection_url(user_id, collection))
    }

    fn query_url(&self, user_id: &str) -> String {
        format!("{}/users/{user_id}:runQuery", self.documents_root())
    }

    fn token(session: &Session) -> Result<&str, StoreError> {
        session.id_token.as_deref().ok_or(StoreError::Unauthenticated)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn run_query(&self, session: &Session, query: Value) -> Result<Vec<Value>, StoreError> {
        let token = Self::token(session)?;
        let body = self
            .send(
                self.client
                    .post(self.query_url(&session.user_id))
                    .bearer_auth(token)
                    .json(&query),
            )
            .await?;

        // runQuery streams one object per result row; rows without a
        // `document` key (readTime-only) are skipped.
        let docs = body
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("document").cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn find_analysis_document(&self, session: &Session) -> Result<Option<Value>, StoreError> {
        let docs = self
            .run_query(session, single_document_query(ANALYSIS_COLLECTION))
            .await?;
        Ok(docs.into_iter().next())
    }
}

#[async_trait]
impl EntryStore for RemoteStore {
    async fn list_all(&self, session: &Session) -> Result<Vec<DiaryEntry>, StoreError> {
        let docs = self.run_query(session, list_query()).await?;
        let raws = docs.iter().map(document_to_raw).collect::<Vec<_>>();
        let mut entries = self.normalizer.normalize_all(&raws);
        // The query orders by date already; enforce the invariant locally
        // rather than trusting backend default order.
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn find_by_date(
        &self,
        session: &Session,
        date: &str,
    ) -> Result<Option<DiaryEntry>, StoreError> {
        let docs = self.run_query(session, date_query(date)).await?;
        let Some(doc) = docs.first() else {
            return Ok(None);
        };
        Ok(self.normalizer.normalize(&document_to_raw(doc)).ok())
    }

    async fn upsert(
        &self,
        session: &Session,
        mut entry: DiaryEntry,
    ) -> Result<DiaryEntry, StoreError> {
        let token = Self::token(session)?.to_string();
        let existing = self.find_by_date(session, &entry.date).await?;
        let now = Utc::now();
        entry.updated_at = Some(now);

        match existing.and_then(|prev| prev.id.clone().map(|id| (id, prev))) {
            Some((id, prev)) => {
                entry.created_at = prev.created_at.or(Some(now));
                entry.id = Some(id.clone());
                let url = self.document_url(&session.user_id, ENTRIES_COLLECTION, &id);
                self.send(
                    self.client
                        .patch(url)
                        .bearer_auth(token)
                        .json(&json!({ "fields": entry_to_fields(&entry) })),
                )
                .await?;
            }
            None => {
                entry.created_at = Some(now);
                let url = self.collection_url(&session.user_id, ENTRIES_COLLECTION);
                let created = self
                    .send(
                        self.client
                            .post(url)
                            .bearer_auth(token)
                            .json(&json!({ "fields": entry_to_fields(&entry) })),
                    )
                    .await?;
                entry.id = document_id(&created);
            }
        }

        Ok(entry)
    }

    async fn delete_by_date(
        &self,
        session: &Session,
        date: &str,
    ) -> Result<Option<String>, StoreError> {
        let token = Self::token(session)?.to_string();
        // Date is not the storage key here; resolve to the document identity
        // first, then delete by id.
        let Some(found) = self.find_by_date(session, date).await? else {
            return Ok(None);
        };
        let Some(id) = found.id else {
            return Ok(None);
        };

        let url = self.document_url(&session.user_id, ENTRIES_COLLECTION, &id);
        self.send(self.client.delete(url).bearer_auth(token)).await?;
        Ok(Some(id))
    }

    async fn load_analysis(
        &self,
        session: &Session,
    ) -> Result<Option<HappinessAnalysis>, StoreError> {
        let Some(doc) = self.find_analysis_document(session).await? else {
            return Ok(None);
        };
        let raw = document_to_raw(&doc);
        let analysis = raw
            .get("analysis")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let updated_at = raw
            .get("updatedAt")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        Ok(Some(HappinessAnalysis {
            analysis,
            updated_at,
        }))
    }

    async fn save_analysis(&self, session: &Session, analysis: &str) -> Result<(), StoreError> {
        let token = Self::token(session)?.to_string();
        let now = Utc::now();
        let existing = self.find_analysis_document(session).await?;

        match existing.as_ref().and_then(document_id) {
            Some(id) => {
                let url = self.document_url(&session.user_id, ANALYSIS_COLLECTION, &id);
                let fields = json!({
                    "analysis": { "stringValue": analysis },
                    "updatedAt": { "timestampValue": now.to_rfc3339() },
                });
                self.send(
                    self.client
                        .patch(url)
                        .bearer_auth(token)
                        .json(&json!({ "fields": fields })),
                )
                .await?;
            }
            None => {
                let url = self.collection_url(&session.user_id, ANALYSIS_COLLECTION);
                let fields = json!({
                    "analysis": { "stringValue": analysis },
                    "createdAt": { "timestampValue": now.to_rfc3339() },
                    "updatedAt": { "timestampValue": now.to_rfc3339() },
                });
                self.send(
                    self.client
                        .post(url)
                        .bearer_auth(token)
                        .json(&json!({ "fields": fields })),
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        session: &Session,
    ) -> Result<watch::Receiver<Vec<DiaryEntry>>, StoreError> {
        let initial = self.list_all(session).await?;
        let (tx, rx) = watch::channel(initial);

        let store = self.clone();
        let session = session.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match store.list_all(&session).await {
                    Ok(entries) => {
                        tx.send_replace(entries);
                    }
                    // Keep the last good snapshot on a failed poll.
                    Err(err) => tracing::warn!(error = %err, "remote snapshot poll failed"),
                }
            }
        });

        Ok(rx)
    }
}

// ── Wire codec ────────────────────────────────────────────────────────────────

/// Encode an entry as document store field values.
pub(crate) fn entry_to_fields(entry: &DiaryEntry) -> Value {
    let items = entry
        .items
        .iter()
        .map(|item| json!({ "stringValue": item }))
        .collect::<Vec<_>>();

    let mut fields = json!({
        "date": { "stringValue": entry.date },
        "items": { "arrayValue": { "values": items } },
        "aiFeedback": { "stringValue": entry.ai_feedback },
    });
    if let Some(created) = entry.created_at {
        fields["createdAt"] = json!({ "timestampValue": created.to_rfc3339() });
    }
    if let Some(updated) = entry.updated_at {
        fields["updatedAt"] = json!({ "timestampValue": updated.to_rfc3339() });
    }
    fields
}

/// Flatten a document (resource `name` + typed `fields`) into the plain JSON
/// shape the [`Normalizer`] accepts. The document id becomes the `id` field.
pub(crate) fn document_to_raw(doc: &Value) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some(id) = document_id(doc) {
        obj.insert("id".to_string(), Value::String(id));
    }
    if let Some(fields) = doc.get("fields").and_then(Value::as_object) {
        for (key, field) in fields {
            obj.insert(key.clone(), plain_value(field));
        }
    }
    Value::Object(obj)
}

/// Last segment of the document resource name.
pub(crate) fn document_id(doc: &Value) -> Option<String> {
    doc.get("name")
        .and_then(Value::as_str)
        .and_then(|name| name.rsplit('/').next())
        .map(str::to_string)
}

fn plain_value(field: &Value) -> Value {
    if let Some(s) = field.get("stringValue") {
        return s.clone();
    }
    if let Some(ts) = field.get("timestampValue") {
        return ts.clone();
    }
    if let Some(values) = field.pointer("/arrayValue/values").and_then(Value::as_array) {
        return Value::Array(values.iter().map(plain_value).collect());
    }
    Value::Null
}

// ── Query bodies ──────────────────────────────────────────────────────────────

fn list_query() -> Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": ENTRIES_COLLECTION }],
            "orderBy": [{ "field": { "fieldPath": "date" }, "direction": "DESCENDING" }],
        }
    })
}

fn date_query(date: &str) -> Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": ENTRIES_COLLECTION }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": "date" },
                    "op": "EQUAL",
                    "value": { "stringValue": date },
                }
            },
            "limit": 1,
        }
    })
}

fn single_document_query(collection: &str) -> Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "limit": 1,
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────
