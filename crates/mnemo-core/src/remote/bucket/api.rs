//! Wire format of the bucket service.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Note, NoteId, TagSet};
use crate::remote::http::{JsonResponse, JsonRestClient};
use crate::util::{epoch_seconds_to_millis, millis_to_epoch_seconds, now_millis};

const VERSION_HEADER: &str = "x-simperium-version";

#[derive(Debug, Serialize)]
struct AuthorizeRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct IndexPage {
    #[serde(default)]
    mark: Option<String>,
    #[serde(default)]
    index: Vec<IndexEntry>,
}

/// One row of the bucket index: note id and its current version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub v: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteData {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    content: String,
    #[serde(default)]
    system_tags: Vec<String>,
    #[serde(default)]
    creation_date: f64,
    #[serde(default)]
    modification_date: f64,
}

#[derive(Debug, Serialize)]
struct ChangeNoteData {
    tags: Vec<String>,
    content: String,
}

#[derive(Debug, Serialize)]
struct TrashNoteData {
    deleted: bool,
}

/// Exchange credentials for an access token.
pub async fn authorize(auth: &JsonRestClient, username: &str, password: &str) -> Result<String> {
    let response: Option<JsonResponse<AuthorizeResponse>> = auth
        .post("authorize/", &[], &AuthorizeRequest { username, password }, &[])
        .await?;
    response
        .map(|response| response.body.access_token)
        .ok_or_else(|| Error::Authentication("authorization returned no token".to_string()))
}

/// Calls against one authenticated bucket.
pub struct BucketApi {
    rest: JsonRestClient,
    page_size: u32,
}

impl BucketApi {
    pub const fn new(rest: JsonRestClient, page_size: u32) -> Self {
        Self { rest, page_size }
    }

    /// Read the whole index, following `mark` until the server stops
    /// returning one. Ids seen on several pages keep the latest entry.
    pub async fn list_index(&self) -> Result<Vec<IndexEntry>> {
        let mut entries: BTreeMap<String, IndexEntry> = BTreeMap::new();
        let mut mark: Option<String> = None;
        let mut seen_marks: HashSet<String> = HashSet::new();
        let mut pages = 0_usize;

        loop {
            let mut query = vec![("limit", self.page_size.to_string())];
            if let Some(mark) = &mark {
                query.push(("mark", mark.clone()));
            }
            let page: IndexPage = self.rest.get("note/index", &query).await?.body;
            pages += 1;

            for entry in page.index {
                entries.insert(entry.id.clone(), entry);
            }

            match page.mark.filter(|next| !next.trim().is_empty()) {
                Some(next) if !seen_marks.insert(next.clone()) => {
                    tracing::warn!(mark = %next, "Bucket index repeated a mark, stopping");
                    break;
                }
                Some(next) => mark = Some(next),
                None => break,
            }
        }

        tracing::debug!(pages, entries = entries.len(), "Listed bucket index");
        Ok(entries.into_values().collect())
    }

    pub async fn get_note(&self, id: &NoteId) -> Result<Note> {
        let response: JsonResponse<NoteData> = self.rest.get(&note_path(id), &[]).await?;
        note_from_response(id, &response)
    }

    pub async fn upload_new_note(&self, note: &Note) -> Result<Note> {
        let now = now_millis();
        let data = NoteData {
            tags: note.tags.to_vec(),
            deleted: false,
            content: note_content(note),
            system_tags: Vec::new(),
            creation_date: millis_to_epoch_seconds(note.created_at),
            modification_date: millis_to_epoch_seconds(now),
        };

        let response = self
            .rest
            .post(&note_path(&note.id), &[("response", "1".to_string())], &data, &[])
            .await?
            .ok_or_else(|| Error::note_sync(&note.id, "server returned no note data"))?;
        note_from_response(&note.id, &response)
    }

    /// Returns the server state and whether anything changed. HTTP 412 means
    /// the server already holds this content.
    pub async fn change_existing_note(&self, note: &Note) -> Result<(Note, bool)> {
        if note.deleted {
            return Err(Error::Invariant(format!("cannot update deleted note {}", note.id)));
        }

        let data = ChangeNoteData {
            tags: note.tags.to_vec(),
            content: note_content(note),
        };
        let response: Option<JsonResponse<NoteData>> = self
            .rest
            .post(&note_path(&note.id), &[("response", "1".to_string())], &data, &[412])
            .await?;

        match response {
            Some(response) => Ok((note_from_response(&note.id, &response)?, true)),
            None => Ok((note.clone(), false)),
        }
    }

    /// Move a note to the trash. HTTP 412 means it already is.
    pub async fn trash_note(&self, id: &NoteId) -> Result<()> {
        self.rest
            .post_discard(&note_path(id), &TrashNoteData { deleted: true }, &[412])
            .await
    }

    /// Remove a note for good. HTTP 404 means it is already gone.
    pub async fn delete_note_permanently(&self, id: &NoteId) -> Result<()> {
        self.rest.delete(&note_path(id), &[404]).await
    }
}

fn note_path(id: &NoteId) -> String {
    format!("note/i/{}", urlencoding::encode(id.as_str()))
}

/// Content on the wire is the title line followed by the body.
fn note_content(note: &Note) -> String {
    format!("{}\n{}", note.title, note.text)
}

fn split_content(content: &str) -> (String, String) {
    match content.split_once('\n') {
        Some((title, text)) => (title.trim_end_matches('\r').to_string(), text.to_string()),
        None => (content.to_string(), String::new()),
    }
}

fn note_from_response(id: &NoteId, response: &JsonResponse<NoteData>) -> Result<Note> {
    let revision = response
        .header(VERSION_HEADER)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .ok_or_else(|| Error::note_sync(id, "response carried no valid note version"))?;

    let data = &response.body;
    let (title, text) = split_content(&data.content);
    let mut note = Note::remote(id.clone(), revision.to_string());
    note.title = title;
    note.text = text;
    note.tags = TagSet::from_names(data.tags.iter().map(String::as_str));
    note.deleted = data.deleted;
    note.created_at = epoch_seconds_to_millis(data.creation_date);
    note.updated_at = epoch_seconds_to_millis(data.modification_date);
    Ok(note)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_splits_on_first_line() {
        assert_eq!(
            split_content("Title\r\nline 1\nline 2"),
            ("Title".to_string(), "line 1\nline 2".to_string())
        );
        assert_eq!(split_content("Only"), ("Only".to_string(), String::new()));
    }

    #[test]
    fn note_data_tolerates_missing_fields() {
        let data: NoteData = serde_json::from_str(r#"{"content":"a\nb"}"#).unwrap();
        assert!(!data.deleted);
        assert!(data.tags.is_empty());
        assert!(data.creation_date.abs() < f64::EPSILON);
    }

    #[test]
    fn note_path_escapes_id() {
        let id: NoteId = "a b/c".parse().unwrap();
        assert_eq!(note_path(&id), "note/i/a%20b%2Fc");
    }
}
