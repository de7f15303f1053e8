//! Item-sync backend: a bearer token and one `items/sync` endpoint that
//! accepts uploads and returns every change since the last sync token.
//!
//! All network traffic happens in `start_sync`; the per-note calls only read
//! the session. Tags travel as separate `Tag` items that reference notes.

mod api;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use self::api::{Item, NoteContent, Reference, TagContent, NOTE_TYPE, TAG_TYPE};
use super::http::JsonRestClient;
use super::session::{self, SyncSession, TagDelta};
use super::{is_upload_candidate, RemoteConnection, UploadResult};
use crate::db::SyncData;
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, TagSet, Tombstone};

const DEFAULT_PAGE_LIMIT: u32 = 150;

const SYNC_TOKEN_KEY: &str = "sync_token";
const TAGS_KEY: &str = "tags";

/// Account settings of the item-sync backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSyncAccount {
    pub server: String,
    pub email: String,
    #[serde(with = "crate::config::obfuscated")]
    pub password: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

impl ItemSyncAccount {
    pub fn new(
        server: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            email: email.into(),
            password: password.into(),
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl fmt::Debug for ItemSyncAccount {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ItemSyncAccount")
            .field("server", &self.server)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("page_limit", &self.page_limit)
            .finish()
    }
}

const fn default_page_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

/// A tag item as last confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TagRecord {
    uuid: String,
    title: String,
    #[serde(default)]
    references: BTreeSet<String>,
}

/// Known tag items keyed by lowercase title.
type TagRecords = BTreeMap<String, TagRecord>;

/// Tag uploads awaiting confirmation: uuid to the record that will be stored
/// once saved, or `None` for a deletion.
type PendingTags = HashMap<String, (String, Option<TagRecord>)>;

/// Connection to one item-sync account.
pub struct ItemSyncConnection {
    account: ItemSyncAccount,
    http: reqwest::Client,
    token: Option<String>,
    session: Option<SyncSession>,
}

impl ItemSyncConnection {
    pub const fn new(account: ItemSyncAccount, http: reqwest::Client) -> Self {
        Self {
            account,
            http,
            token: None,
            session: None,
        }
    }

    async fn client(&mut self) -> Result<JsonRestClient> {
        let rest = JsonRestClient::new(self.http.clone(), self.account.server.as_str())?;
        let token = match &self.token {
            Some(token) => token.clone(),
            None => {
                tracing::debug!(email = %self.account.email, "Requesting item sync token");
                let token = api::sign_in(&rest, &self.account.email, &self.account.password).await?;
                self.token = Some(token.clone());
                token
            }
        };
        rest.with_bearer(&token)
    }

    fn check_auth<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::Authentication(_))) {
            self.token = None;
        }
        result
    }
}

fn timestamp(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

fn note_item(note: &Note) -> Result<Item> {
    let content = NoteContent {
        title: note.title.clone(),
        text: note.text.clone(),
        references: Vec::new(),
    };
    Ok(Item {
        uuid: note.id.to_string(),
        content_type: NOTE_TYPE.to_string(),
        content: Some(serde_json::to_value(content)?),
        deleted: false,
        created_at: timestamp(note.created_at),
        updated_at: note
            .remote_revision
            .as_deref()
            .and_then(|revision| DateTime::parse_from_rfc3339(revision).ok())
            .map(|at| at.with_timezone(&Utc)),
    })
}

fn deleted_note_item(tombstone: &Tombstone) -> Item {
    Item {
        uuid: tombstone.note_id.to_string(),
        content_type: NOTE_TYPE.to_string(),
        content: None,
        deleted: true,
        created_at: None,
        updated_at: None,
    }
}

fn tag_item(record: &TagRecord, deleted: bool) -> Result<Item> {
    let content = (!deleted)
        .then(|| {
            serde_json::to_value(TagContent {
                title: record.title.clone(),
                references: record
                    .references
                    .iter()
                    .map(|uuid| Reference {
                        uuid: uuid.clone(),
                        content_type: NOTE_TYPE.to_string(),
                    })
                    .collect(),
            })
        })
        .transpose()?;
    Ok(Item {
        uuid: record.uuid.clone(),
        content_type: TAG_TYPE.to_string(),
        content,
        deleted,
        created_at: None,
        updated_at: None,
    })
}

/// Compare the tags used by local notes with the known tag items and build
/// the uploads needed to bring the server in line. Tags no note uses any
/// more are uploaded as deleted.
fn tag_changes(records: &TagRecords, local_notes: &[Note]) -> Result<(Vec<Item>, PendingTags)> {
    let mut desired: BTreeMap<String, (String, BTreeSet<String>)> = BTreeMap::new();
    for note in local_notes.iter().filter(|note| !note.deleted) {
        for name in note.tags.names() {
            desired
                .entry(name.to_lowercase())
                .or_insert_with(|| (name.to_string(), BTreeSet::new()))
                .1
                .insert(note.id.to_string());
        }
    }

    let mut items = Vec::new();
    let mut pending = PendingTags::new();

    for (key, (title, references)) in desired {
        let record = match records.get(&key) {
            Some(known) if known.references == references => continue,
            Some(known) => TagRecord {
                uuid: known.uuid.clone(),
                title: known.title.clone(),
                references,
            },
            None => TagRecord {
                uuid: Uuid::now_v7().to_string(),
                title,
                references,
            },
        };
        items.push(tag_item(&record, false)?);
        pending.insert(record.uuid.clone(), (key, Some(record)));
    }

    for (key, record) in records {
        let used = local_notes
            .iter()
            .filter(|note| !note.deleted)
            .any(|note| note.tags.contains(key));
        if !used {
            items.push(tag_item(record, true)?);
            pending.insert(record.uuid.clone(), (key.clone(), None));
        }
    }

    Ok((items, pending))
}

/// Apply retrieved tag items to the known records and return the ids of
/// every note whose tag set may have changed.
fn apply_retrieved_tags(records: &mut TagRecords, items: &[&Item]) -> Result<BTreeSet<String>> {
    let mut affected = BTreeSet::new();
    for item in items {
        if let Some(key) = records
            .iter()
            .find(|(_, record)| record.uuid == item.uuid)
            .map(|(key, _)| key.clone())
        {
            if let Some(old) = records.remove(&key) {
                affected.extend(old.references);
            }
        }
        if item.deleted {
            continue;
        }

        let content: TagContent = item.decode_content()?;
        let record = TagRecord {
            uuid: item.uuid.clone(),
            title: content.title,
            references: content
                .references
                .into_iter()
                .filter(|reference| reference.content_type == NOTE_TYPE)
                .map(|reference| reference.uuid)
                .collect(),
        };
        affected.extend(record.references.iter().cloned());
        records.insert(record.title.to_lowercase(), record);
    }
    Ok(affected)
}

fn tags_of(records: &TagRecords, id: &str) -> TagSet {
    TagSet::from_names(
        records
            .values()
            .filter(|record| record.references.contains(id))
            .map(|record| record.title.as_str()),
    )
}

fn note_from_item(item: &Item, records: &TagRecords) -> Result<Note> {
    let content: NoteContent = item.decode_content()?;
    let mut note = Note::remote(item.uuid.parse()?, item.revision());
    note.title = content.title;
    note.text = content.text;
    note.tags = tags_of(records, &item.uuid);
    note.created_at = item.created_at.map_or(0, |at| at.timestamp_millis());
    note.updated_at = item.updated_at.map_or(0, |at| at.timestamp_millis());
    Ok(note)
}

/// One complete exchange with the server, classified into a session.
async fn exchange(
    rest: &JsonRestClient,
    limit: u32,
    data: &mut SyncData,
    local_notes: &[Note],
    local_deleted: &[Tombstone],
) -> Result<SyncSession> {
    let mut records: TagRecords = data.get(TAGS_KEY)?.unwrap_or_default();
    let sync_token: Option<String> = data.get(SYNC_TOKEN_KEY)?;

    let uploads: HashMap<&str, &Note> = local_notes
        .iter()
        .filter(|note| is_upload_candidate(note))
        .map(|note| (note.id.as_str(), note))
        .collect();

    let mut items = uploads
        .values()
        .map(|note| note_item(note))
        .collect::<Result<Vec<_>>>()?;
    items.extend(local_deleted.iter().map(deleted_note_item));
    let (tag_items, mut pending) = tag_changes(&records, local_notes)?;
    let uploaded_tags = tag_items.len();
    items.extend(tag_items);

    let batch = api::sync(rest, items, sync_token, limit).await?;
    let mut session = SyncSession::default();
    let mut delta = TagDelta::default();

    let retrieved_tags: Vec<&Item> = batch.retrieved.iter().filter(|item| item.is_tag()).collect();
    delta.retrieved = retrieved_tags.len();
    let affected = apply_retrieved_tags(&mut records, &retrieved_tags)?;

    for item in batch.retrieved.iter().filter(|item| item.is_note()) {
        let id: NoteId = item.uuid.parse()?;
        if item.deleted {
            session.record_deleted(id);
        } else {
            session.record_retrieved(note_from_item(item, &records)?);
        }
    }

    for item in &batch.saved {
        if item.is_tag() {
            if let Some((key, record)) = pending.remove(&item.uuid) {
                match record {
                    Some(record) => records.insert(key, record),
                    None => records.remove(&key),
                };
            }
            delta.saved += 1;
            continue;
        }

        let id: NoteId = item.uuid.parse()?;
        if item.deleted {
            session.record_deleted(id);
        } else if let Some(local) = uploads.get(item.uuid.as_str()) {
            let mut saved = (*local).clone();
            saved.remote_revision = Some(item.revision());
            saved.updated_at = item.updated_at.map_or(saved.updated_at, |at| at.timestamp_millis());
            saved.tags = TagSet::from_names(local.tags.names());
            saved.dirty = false;
            session.record_saved(saved);
        }
    }

    for (item, reason) in &batch.unsaved {
        if item.is_tag() {
            tracing::warn!(tag = %item.uuid, %reason, "Server refused tag item");
            delta.unsaved += 1;
            continue;
        }

        let id: NoteId = item.uuid.parse()?;
        if item.deleted {
            session.record_rejected_deletion(id, reason.clone());
        } else {
            session.record_unsaved(id, reason.clone());
        }
    }

    // Tag items may change a note's tags without touching the note item.
    for note in local_notes {
        let id = note.id.as_str();
        if !affected.contains(id) || session.mentions(&note.id) || uploads.contains_key(id) {
            continue;
        }
        let tags = tags_of(&records, id);
        if !note.tags.equivalent(&tags) {
            let mut updated = note.clone();
            updated.tags = tags;
            updated.dirty = false;
            session.record_retrieved(updated);
        }
    }

    data.set(TAGS_KEY, &records)?;
    if let Some(token) = &batch.sync_token {
        data.set(SYNC_TOKEN_KEY, token)?;
    }

    session.tags = delta;
    tracing::debug!(
        pages = batch.pages,
        upload_notes = uploads.len(),
        upload_deleted = local_deleted.len(),
        upload_tags = uploaded_tags,
        retrieved = session.retrieved_count(),
        deleted = session.deleted_count(),
        saved = session.saved_count(),
        unsaved = session.unsaved_count(),
        tags_retrieved = delta.retrieved,
        tags_saved = delta.saved,
        tags_unsaved = delta.unsaved,
        "Item sync finished"
    );
    Ok(session)
}

#[async_trait]
impl RemoteConnection for ItemSyncConnection {
    fn backend(&self) -> &'static str {
        "item_sync"
    }

    async fn start_sync(
        &mut self,
        data: &mut SyncData,
        local_notes: &[Note],
        local_deleted: &[Tombstone],
    ) -> Result<()> {
        session::ensure_closed(self.session.as_ref())?;

        let limit = self.account.page_limit;
        let result = match self.client().await {
            Ok(rest) => exchange(&rest, limit, data, local_notes, local_deleted).await,
            Err(error) => Err(error),
        };
        self.session = Some(self.check_auth(result)?);
        Ok(())
    }

    fn session(&self) -> Option<&SyncSession> {
        self.session.as_ref()
    }

    fn finish_sync(&mut self) {
        self.session = None;
    }

    async fn upload_note_to_remote(&mut self, note: &mut Note) -> Result<UploadResult> {
        session::require(self.session.as_ref())?.classify_upload(note)
    }

    async fn delete_note(&mut self, tombstone: &Tombstone) -> Result<()> {
        let session = session::require(self.session.as_ref())?;
        if tombstone.remote_revision.is_none() {
            return Err(Error::Invariant(format!(
                "cannot delete note {} that was never uploaded",
                tombstone.note_id
            )));
        }
        session.confirm_deletion(tombstone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STAMP: &str = "2024-03-01T10:00:00.000000Z";

    fn account(server: &MockServer) -> ItemSyncAccount {
        ItemSyncAccount::new(server.uri(), "me@example.com", "secret")
    }

    async fn mount_sign_in(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/sign_in"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "bearer-1",
                "user": {"uuid": "u1", "email": "me@example.com"}
            })))
            .mount(server)
            .await;
    }

    async fn mount_sync(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path("/items/sync"))
            .and(header("authorization", "Bearer bearer-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn dirty(id: &str, title: &str) -> Note {
        let mut note = Note::new_local();
        note.id = id.parse().unwrap();
        note.title = title.to_string();
        note.text = "body".to_string();
        note
    }

    fn synced(id: &str) -> Note {
        let mut note = Note::remote(id.parse().unwrap(), STAMP);
        note.title = "Synced".to_string();
        note
    }

    async fn sent_items(server: &MockServer) -> Vec<Value> {
        let requests = server.received_requests().await.unwrap();
        let sync = requests
            .iter()
            .find(|request| request.url.path() == "/items/sync")
            .unwrap();
        let body: Value = serde_json::from_slice(&sync.body).unwrap();
        body["items"].as_array().unwrap().clone()
    }

    #[tokio::test]
    async fn session_classifies_saved_unsaved_and_retrieved() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;
        mount_sync(
            &server,
            json!({
                "retrieved_items": [
                    {"uuid": "remote-1", "content_type": "Note", "updated_at": STAMP,
                     "content": {"title": "From server", "text": "hi", "references": []}},
                    {"uuid": "tag-1", "content_type": "Tag", "updated_at": STAMP,
                     "content": {"title": "Work", "references": [{"uuid": "remote-1", "content_type": "Note"}]}}
                ],
                "saved_items": [
                    {"uuid": "ok", "content_type": "Note", "updated_at": STAMP},
                    {"uuid": "gone", "content_type": "Note", "deleted": true, "updated_at": STAMP}
                ],
                "unsaved": [
                    {"item": {"uuid": "bad", "content_type": "Note"},
                     "error": {"message": "sync conflict", "tag": "sync_conflict"}}
                ],
                "sync_token": "token-2"
            }),
        )
        .await;

        let mut ok = dirty("ok", "Accepted");
        let mut bad = dirty("bad", "Refused");
        let mut gone = synced("gone");
        gone.deleted = true;
        let tombstone = Tombstone::new(&gone);

        let mut connection = ItemSyncConnection::new(account(&server), reqwest::Client::new());
        let mut data = SyncData::default();
        connection
            .start_sync(&mut data, &[ok.clone(), bad.clone()], std::slice::from_ref(&tombstone))
            .await
            .unwrap();

        assert_eq!(
            connection.upload_note_to_remote(&mut ok).await.unwrap(),
            UploadResult::Uploaded
        );
        assert!(!ok.dirty);
        assert_eq!(ok.remote_revision.as_deref(), Some(STAMP));

        let error = connection.upload_note_to_remote(&mut bad).await.unwrap_err();
        assert!(matches!(error, Error::NoteSync { .. }));
        assert!(error.to_string().contains("sync conflict"));

        connection.delete_note(&tombstone).await.unwrap();

        let missing = connection.list_missing_notes(&[ok.clone(), bad]).unwrap();
        assert_eq!(missing, vec!["remote-1".parse::<NoteId>().unwrap()]);
        let downloaded = connection.download_note(&missing[0]).await.unwrap().unwrap();
        assert_eq!(downloaded.title, "From server");
        assert!(downloaded.tags.contains("work"));

        let session = connection.session().unwrap();
        assert_eq!(session.tags.retrieved, 1);
        assert_eq!(data.get::<String>(SYNC_TOKEN_KEY).unwrap().as_deref(), Some("token-2"));

        let uploaded = sent_items(&server).await;
        assert!(uploaded.iter().any(|item| item["uuid"] == "gone" && item["deleted"] == true));
        assert!(uploaded.iter().any(|item| item["uuid"] == "ok"));
    }

    #[tokio::test]
    async fn unused_tags_are_uploaded_as_deleted() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;
        mount_sync(
            &server,
            json!({
                "saved_items": [{"uuid": "tag-old", "content_type": "Tag", "deleted": true}],
                "sync_token": "t"
            }),
        )
        .await;

        let mut records = TagRecords::new();
        records.insert(
            "old".to_string(),
            TagRecord {
                uuid: "tag-old".to_string(),
                title: "Old".to_string(),
                references: ["n1".to_string()].into_iter().collect(),
            },
        );
        let mut data = SyncData::default();
        data.set(TAGS_KEY, &records).unwrap();

        let mut connection = ItemSyncConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut data, &[synced("n1")], &[])
            .await
            .unwrap();

        let uploaded = sent_items(&server).await;
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0]["uuid"], "tag-old");
        assert_eq!(uploaded[0]["deleted"], true);

        let stored: TagRecords = data.get(TAGS_KEY).unwrap().unwrap();
        assert!(stored.is_empty());
        assert_eq!(connection.session().unwrap().tags.saved, 1);
    }

    #[tokio::test]
    async fn retrieved_tag_item_updates_clean_note() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;
        mount_sync(
            &server,
            json!({
                "retrieved_items": [
                    {"uuid": "tag-1", "content_type": "Tag",
                     "content": {"title": "Later", "references": [{"uuid": "n1", "content_type": "Note"}]}}
                ]
            }),
        )
        .await;

        let mut note = synced("n1");
        let mut connection = ItemSyncConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), std::slice::from_ref(&note), &[])
            .await
            .unwrap();

        assert!(connection.needs_download(&note));
        connection.update_note_from_remote(&mut note).await.unwrap();
        assert!(note.tags.contains("later"));
    }

    #[tokio::test]
    async fn new_tag_is_uploaded_with_references() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;
        mount_sync(&server, json!({})).await;

        let mut note = dirty("n1", "Tagged");
        note.tags.insert("Ideas");

        let mut connection = ItemSyncConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &[note], &[])
            .await
            .unwrap();

        let uploaded = sent_items(&server).await;
        let tag = uploaded
            .iter()
            .find(|item| item["content_type"] == "Tag")
            .unwrap();
        assert_eq!(tag["content"]["title"], "Ideas");
        assert_eq!(tag["content"]["references"][0]["uuid"], "n1");
    }

    #[tokio::test]
    async fn rejected_sign_in_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/sign_in"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "Invalid email or password."}})),
            )
            .mount(&server)
            .await;

        let mut connection = ItemSyncConnection::new(account(&server), reqwest::Client::new());
        let error = connection
            .start_sync(&mut SyncData::default(), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Authentication(ref message) if message.contains("Invalid email")));
    }
}
