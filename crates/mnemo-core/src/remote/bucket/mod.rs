//! Bucket backend: a per-user bucket of JSON notes with an index that lists
//! every note id and version, paged by a `mark` cursor.

mod api;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use self::api::BucketApi;
use super::http::JsonRestClient;
use super::session::{self, SyncSession};
use super::{RemoteConnection, UploadResult};
use crate::db::SyncData;
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, Tombstone};

pub use self::api::IndexEntry;

const DEFAULT_AUTH_URL: &str = "https://auth.simperium.com";
const DEFAULT_API_URL: &str = "https://api.simperium.com";
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Persistence key: versions of notes known to be in the remote trash.
const TRASHED_KEY: &str = "trashed";

/// Account settings of the bucket backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAccount {
    pub username: String,
    #[serde(with = "crate::config::obfuscated")]
    pub password: String,
    pub app_id: String,
    pub api_key: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Delete notes for good instead of moving them to the trash
    #[serde(default)]
    pub permanent_delete: bool,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl BucketAccount {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        app_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            app_id: app_id.into(),
            api_key: api_key.into(),
            auth_url: default_auth_url(),
            api_url: default_api_url(),
            permanent_delete: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl fmt::Debug for BucketAccount {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BucketAccount")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("app_id", &self.app_id)
            .field("auth_url", &self.auth_url)
            .field("api_url", &self.api_url)
            .field("permanent_delete", &self.permanent_delete)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Connection to one bucket account.
pub struct BucketConnection {
    account: BucketAccount,
    http: reqwest::Client,
    token: Option<String>,
    session: Option<SyncSession>,
}

impl BucketConnection {
    pub const fn new(account: BucketAccount, http: reqwest::Client) -> Self {
        Self {
            account,
            http,
            token: None,
            session: None,
        }
    }

    fn bucket_url(base: &str, app_id: &str) -> String {
        format!("{}/1/{}", base.trim_end_matches('/'), app_id)
    }

    async fn api(&mut self) -> Result<BucketApi> {
        let token = match &self.token {
            Some(token) => token.clone(),
            None => {
                let auth = JsonRestClient::new(
                    self.http.clone(),
                    Self::bucket_url(&self.account.auth_url, &self.account.app_id),
                )?
                .with_header("x-simperium-api-key", &self.account.api_key)?;

                tracing::debug!(user = %self.account.username, "Requesting bucket token");
                let token =
                    api::authorize(&auth, &self.account.username, &self.account.password).await?;
                self.token = Some(token.clone());
                token
            }
        };

        let rest = JsonRestClient::new(
            self.http.clone(),
            Self::bucket_url(&self.account.api_url, &self.account.app_id),
        )?
        .with_header("x-simperium-token", &token)?;
        Ok(BucketApi::new(rest, self.account.page_size))
    }

    /// A rejected token is dropped so the next call authenticates again.
    fn check_auth<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::Authentication(_))) {
            self.token = None;
        }
        result
    }
}

/// Build the session from the remote index. Only notes whose version differs
/// from the local revision are fetched.
async fn collect(
    api: &BucketApi,
    data: &mut SyncData,
    local_notes: &[Note],
    local_deleted: &[Tombstone],
) -> Result<SyncSession> {
    let index = api.list_index().await?;

    let mut trashed: BTreeMap<String, u64> = data.get(TRASHED_KEY)?.unwrap_or_default();
    let local: HashMap<&str, Option<&str>> = local_notes
        .iter()
        .map(|note| (note.id.as_str(), note.remote_revision.as_deref()))
        .collect();
    let tombstoned: HashSet<&str> = local_deleted
        .iter()
        .map(|tombstone| tombstone.note_id.as_str())
        .collect();

    let mut session = SyncSession::default();
    let mut listed: HashSet<&str> = HashSet::new();

    for entry in &index {
        listed.insert(entry.id.as_str());
        if tombstoned.contains(entry.id.as_str()) {
            continue;
        }

        let version = entry.v.to_string();
        let known = local.get(entry.id.as_str()).copied();
        if known == Some(Some(version.as_str())) {
            continue;
        }
        if known.is_none() && trashed.get(&entry.id) == Some(&entry.v) {
            continue;
        }

        let id: NoteId = entry.id.parse()?;
        let note = api.get_note(&id).await?;
        if note.deleted {
            trashed.insert(entry.id.clone(), entry.v);
            if known.is_some() {
                session.record_deleted(id);
            }
        } else {
            trashed.remove(&entry.id);
            session.record_retrieved(note);
        }
    }

    for note in local_notes {
        let vanished = note.remote_revision.is_some()
            && !listed.contains(note.id.as_str())
            && !tombstoned.contains(note.id.as_str());
        if vanished {
            session.record_deleted(note.id.clone());
        }
    }

    trashed.retain(|id, _| listed.contains(id.as_str()));
    data.set(TRASHED_KEY, &trashed)?;
    Ok(session)
}

#[async_trait]
impl RemoteConnection for BucketConnection {
    fn backend(&self) -> &'static str {
        "bucket"
    }

    async fn start_sync(
        &mut self,
        data: &mut SyncData,
        local_notes: &[Note],
        local_deleted: &[Tombstone],
    ) -> Result<()> {
        session::ensure_closed(self.session.as_ref())?;

        let result = match self.api().await {
            Ok(api) => collect(&api, data, local_notes, local_deleted).await,
            Err(error) => Err(error),
        };
        let session = self.check_auth(result)?;

        tracing::debug!(
            retrieved = session.retrieved_count(),
            deleted = session.deleted_count(),
            "Bucket index compared"
        );
        self.session = Some(session);
        Ok(())
    }

    fn session(&self) -> Option<&SyncSession> {
        self.session.as_ref()
    }

    fn finish_sync(&mut self) {
        self.session = None;
    }

    async fn upload_note_to_remote(&mut self, note: &mut Note) -> Result<UploadResult> {
        match session::require(self.session.as_ref())?.classify_upload(note)? {
            UploadResult::UpToDate => {}
            other => return Ok(other),
        }

        let result = match self.api().await {
            Ok(api) if note.remote_revision.is_none() => {
                api.upload_new_note(note).await.map(|remote| (remote, true))
            }
            Ok(api) => api.change_existing_note(note).await,
            Err(error) => Err(error),
        };
        let (remote, updated) = self.check_auth(result)?;

        if !updated {
            tracing::debug!(note_id = %note.id, "Server already holds this content");
            return Ok(UploadResult::UpToDate);
        }

        note.apply_remote(&remote);
        if let Some(session) = self.session.as_mut() {
            session.record_saved(remote);
        }
        Ok(UploadResult::Uploaded)
    }

    async fn delete_note(&mut self, tombstone: &Tombstone) -> Result<()> {
        session::require(self.session.as_ref())?;
        if tombstone.remote_revision.is_none() {
            return Err(Error::Invariant(format!(
                "cannot delete note {} that was never uploaded",
                tombstone.note_id
            )));
        }

        let permanent = self.account.permanent_delete;
        let result = match self.api().await {
            Ok(api) if permanent => api.delete_note_permanently(&tombstone.note_id).await,
            Ok(api) => api.trash_note(&tombstone.note_id).await,
            Err(error) => Err(error),
        };
        self.check_auth(result)?;

        if let Some(session) = self.session.as_mut() {
            session.record_deleted(tombstone.note_id.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagSet;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account(server: &MockServer) -> BucketAccount {
        let mut account = BucketAccount::new("me@example.com", "secret", "app", "key");
        account.auth_url = server.uri();
        account.api_url = server.uri();
        account
    }

    async fn mount_authorize(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/1/app/authorize/"))
            .and(header("x-simperium-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "me@example.com",
                "access_token": "tok",
                "userid": "u1"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn index(ids: &[(&str, u64)], mark: Option<&str>) -> ResponseTemplate {
        let entries: Vec<_> = ids.iter().map(|(id, v)| json!({"id": id, "v": v})).collect();
        let mut body = json!({"current": "c", "index": entries});
        if let Some(mark) = mark {
            body["mark"] = json!(mark);
        }
        ResponseTemplate::new(200).set_body_json(body)
    }

    fn note_body(content: &str, version: u64) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("X-Simperium-Version", version.to_string().as_str())
            .set_body_json(json!({
                "content": content,
                "tags": ["Work"],
                "deleted": false,
                "creationDate": 1_700_000_000.0,
                "modificationDate": 1_700_000_100.5
            }))
    }

    fn synced(id: &str, revision: &str) -> Note {
        let mut note = Note::remote(id.parse().unwrap(), revision);
        note.title = "T".to_string();
        note.text = "body".to_string();
        note
    }

    #[tokio::test]
    async fn index_pages_are_followed_until_mark_is_empty() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;

        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[("a", 1), ("b", 1)], Some("P2")))
            .with_priority(10)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .and(query_param("mark", "P2"))
            .respond_with(index(&[("c", 1), ("d", 1)], Some("P3")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .and(query_param("mark", "P3"))
            .respond_with(index(&[("e", 1)], None))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/1/app/note/i/[a-e]$"))
            .and(header("x-simperium-token", "tok"))
            .respond_with(note_body("Title\nText", 1))
            .expect(5)
            .mount(&server)
            .await;

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &[], &[])
            .await
            .unwrap();

        let session = connection.session().unwrap();
        assert_eq!(session.retrieved_count(), 5);
        let missing = connection.list_missing_notes(&[]).unwrap();
        assert_eq!(missing.len(), 5);

        let downloaded = connection.download_note(&missing[0]).await.unwrap().unwrap();
        assert_eq!(downloaded.title, "Title");
        assert_eq!(downloaded.text, "Text");
        assert_eq!(downloaded.created_at, 1_700_000_000_000);
        assert!(downloaded.tags.equivalent(&TagSet::from_names(["work"])));
    }

    #[tokio::test]
    async fn index_stops_when_marks_cycle() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;

        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[("a", 1)], Some("P2")))
            .with_priority(10)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .and(query_param("mark", "P2"))
            .respond_with(index(&[("b", 1)], Some("P3")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .and(query_param("mark", "P3"))
            .respond_with(index(&[("c", 1)], Some("P2")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/1/app/note/i/[a-c]$"))
            .respond_with(note_body("Title\nText", 1))
            .expect(3)
            .mount(&server)
            .await;

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &[], &[])
            .await
            .unwrap();

        assert_eq!(connection.session().unwrap().retrieved_count(), 3);
    }

    #[tokio::test]
    async fn start_sync_only_fetches_changed_notes() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[("same", 3), ("changed", 4)], None))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/i/same"))
            .respond_with(note_body("T\nbody", 3))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/i/changed"))
            .respond_with(note_body("T\nnew body", 4))
            .expect(1)
            .mount(&server)
            .await;

        let local = vec![synced("same", "3"), synced("changed", "3"), synced("gone", "1")];
        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &local, &[])
            .await
            .unwrap();

        assert!(!connection.needs_download(&local[0]));
        assert!(connection.needs_download(&local[1]));
        assert!(connection.needs_download(&local[2]));
        assert!(connection.session().unwrap().is_deleted(&local[2].id));
    }

    #[tokio::test]
    async fn unchanged_upload_keeps_revision() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[("n1", 3)], None))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/app/note/i/n1"))
            .and(query_param("response", "1"))
            .respond_with(ResponseTemplate::new(412))
            .expect(1)
            .mount(&server)
            .await;

        let mut note = synced("n1", "3");
        note.dirty = true;

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &[note.clone()], &[])
            .await
            .unwrap();
        assert!(connection.needs_upload(&note));

        let result = connection.upload_note_to_remote(&mut note).await.unwrap();
        assert_eq!(result, UploadResult::UpToDate);
        assert_eq!(note.remote_revision.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn new_note_upload_takes_server_revision() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[], None))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/app/note/i/fresh"))
            .respond_with(note_body("Draft\nhello", 1))
            .expect(1)
            .mount(&server)
            .await;

        let mut note = Note::new_local();
        note.id = "fresh".parse().unwrap();
        note.title = "Draft".to_string();
        note.text = "hello".to_string();

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &[note.clone()], &[])
            .await
            .unwrap();

        let result = connection.upload_note_to_remote(&mut note).await.unwrap();
        assert_eq!(result, UploadResult::Uploaded);
        assert_eq!(note.remote_revision.as_deref(), Some("1"));
        assert!(connection.session().unwrap().saved(&note.id).is_some());
    }

    #[tokio::test]
    async fn deletion_moves_note_to_trash() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[("n1", 2)], None))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/app/note/i/n1"))
            .and(body_json(json!({"deleted": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let mut deleted = synced("n1", "2");
        deleted.deleted = true;
        let tombstone = Tombstone::new(&deleted);

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &[], std::slice::from_ref(&tombstone))
            .await
            .unwrap();
        connection.delete_note(&tombstone).await.unwrap();
        assert!(connection.session().unwrap().is_deleted(&tombstone.note_id));
    }

    #[tokio::test]
    async fn deleting_never_uploaded_note_is_rejected() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[], None))
            .mount(&server)
            .await;

        let tombstone = Tombstone::new(&Note::new_local());
        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        connection
            .start_sync(&mut SyncData::default(), &[], &[])
            .await
            .unwrap();

        let error = connection.delete_note(&tombstone).await.unwrap_err();
        assert!(matches!(error, Error::Invariant(_)));
    }

    #[tokio::test]
    async fn rejected_credentials_fail_the_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/app/authorize/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid password"))
            .mount(&server)
            .await;

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        let error = connection
            .start_sync(&mut SyncData::default(), &[], &[])
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Authentication(_)));
        assert!(error.is_session_fatal());
        assert!(connection.session().is_none());
    }

    #[tokio::test]
    async fn token_is_reused_across_passes() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[], None))
            .expect(2)
            .mount(&server)
            .await;

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        let mut data = SyncData::default();
        for _ in 0..2 {
            connection.start_sync(&mut data, &[], &[]).await.unwrap();
            connection.finish_sync();
        }
    }

    #[tokio::test]
    async fn second_start_without_finish_is_rejected() {
        let server = MockServer::start().await;
        mount_authorize(&server).await;
        Mock::given(method("GET"))
            .and(path("/1/app/note/index"))
            .respond_with(index(&[], None))
            .mount(&server)
            .await;

        let mut connection = BucketConnection::new(account(&server), reqwest::Client::new());
        let mut data = SyncData::default();
        connection.start_sync(&mut data, &[], &[]).await.unwrap();
        let error = connection.start_sync(&mut data, &[], &[]).await.unwrap_err();
        assert!(matches!(error, Error::Invariant(_)));
    }

    #[test]
    fn debug_redacts_password() {
        let debug = format!("{:?}", BucketAccount::new("me", "hunter2", "app", "key"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
