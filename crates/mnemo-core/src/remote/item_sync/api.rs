//! Wire format of the item-sync service.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::remote::http::{JsonResponse, JsonRestClient};

pub const NOTE_TYPE: &str = "Note";
pub const TAG_TYPE: &str = "Tag";

/// One synchronized record. Notes and tags share this envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub uuid: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_note(&self) -> bool {
        self.content_type == NOTE_TYPE
    }

    pub fn is_tag(&self) -> bool {
        self.content_type == TAG_TYPE
    }

    /// Server version of the item, used as the note revision.
    pub fn revision(&self) -> String {
        self.updated_at.map_or_else(
            || "0".to_string(),
            |at| at.to_rfc3339_opts(SecondsFormat::Micros, true),
        )
    }

    /// Decode the content payload.
    pub fn decode_content<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.content {
            Some(content) => serde_json::from_value(content.clone()).map_err(|e| {
                Error::decode(format!("reading {} item {}", self.content_type, self.uuid), e)
            }),
            None => Ok(T::default()),
        }
    }
}

/// Pointer from a tag to a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub uuid: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct SyncRequest {
    items: Vec<Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor_token: Option<String>,
    limit: u32,
}

#[derive(Debug, Default, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    retrieved_items: Vec<Item>,
    #[serde(default)]
    saved_items: Vec<Item>,
    #[serde(default)]
    unsaved: Vec<UnsavedItem>,
    #[serde(default)]
    sync_token: Option<String>,
    #[serde(default)]
    cursor_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnsavedItem {
    item: Item,
    #[serde(default)]
    error: UnsavedError,
}

#[derive(Debug, Default, Deserialize)]
struct UnsavedError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

impl UnsavedError {
    fn describe(self) -> String {
        match (self.tag, self.message) {
            (Some(tag), Some(message)) => format!("{message} ({tag})"),
            (None, Some(message)) => message,
            (Some(tag), None) => tag,
            (None, None) => "no reason given".to_string(),
        }
    }
}

/// Everything one sync exchange returned, cursor pages combined.
#[derive(Debug, Default)]
pub struct SyncBatch {
    pub retrieved: Vec<Item>,
    pub saved: Vec<Item>,
    pub unsaved: Vec<(Item, String)>,
    pub sync_token: Option<String>,
    pub pages: usize,
}

pub async fn sign_in(rest: &JsonRestClient, email: &str, password: &str) -> Result<String> {
    let response: Option<JsonResponse<SignInResponse>> = rest
        .post("auth/sign_in", &[], &SignInRequest { email, password }, &[])
        .await?;
    response
        .map(|response| response.body.token)
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| Error::Authentication("sign in returned no token".to_string()))
}

/// Upload `items` and pull every change since `sync_token`, following
/// `cursor_token` with empty uploads until the server stops returning one.
/// Retrieved items seen on several pages keep the latest copy.
pub async fn sync(
    rest: &JsonRestClient,
    items: Vec<Item>,
    sync_token: Option<String>,
    limit: u32,
) -> Result<SyncBatch> {
    let mut batch = SyncBatch::default();
    let mut retrieved: BTreeMap<String, Item> = BTreeMap::new();
    let mut request = SyncRequest {
        items,
        sync_token,
        cursor_token: None,
        limit,
    };

    loop {
        let response: SyncResponse = rest
            .post("items/sync", &[], &request, &[])
            .await?
            .map(|response| response.body)
            .unwrap_or_default();
        batch.pages += 1;

        for item in response.retrieved_items {
            retrieved.insert(item.uuid.clone(), item);
        }
        batch.saved.extend(response.saved_items);
        batch
            .unsaved
            .extend(response.unsaved.into_iter().map(|u| (u.item, u.error.describe())));
        if let Some(token) = response.sync_token.filter(|token| !token.is_empty()) {
            batch.sync_token = Some(token);
        }

        let cursor = response.cursor_token.filter(|cursor| !cursor.is_empty());
        match cursor {
            Some(cursor) if request.cursor_token.as_deref() == Some(cursor.as_str()) => {
                tracing::warn!(%cursor, "Item sync repeated its cursor, stopping");
                break;
            }
            Some(cursor) => {
                request.items = Vec::new();
                request.cursor_token = Some(cursor);
            }
            None => break,
        }
    }

    batch.retrieved = retrieved.into_values().collect();
    Ok(batch)
}
