/// Plex Media Server backend
use super::{CastEdit, ItemEdit, LibraryCapabilities, LibraryItem, MediaLibrary};
use crate::error::LibraryError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const CLIENT_IDENTIFIER: &str = "jav-meta-updater";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Deserialize)]
struct SectionList {
    #[serde(rename = "Directory", default)]
    directories: Vec<SectionDirectory>,
}

#[derive(Debug, Deserialize)]
struct SectionDirectory {
    key: String,
    title: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct MetadataList {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct Part {
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "Part", default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlexMetadata {
    rating_key: String,
    #[serde(default)]
    title: String,
    studio: Option<String>,
    thumb: Option<String>,
    art: Option<String>,
    #[serde(rename = "Genre", default)]
    genres: Vec<Tag>,
    #[serde(rename = "Role", default)]
    roles: Vec<Tag>,
    #[serde(rename = "Collection", default)]
    collections: Vec<Tag>,
    #[serde(rename = "Label", default)]
    labels: Vec<Tag>,
    #[serde(rename = "Media", default)]
    media: Vec<Media>,
}

fn tags(list: Vec<Tag>) -> Vec<String> {
    list.into_iter().map(|t| t.tag).collect()
}

impl From<PlexMetadata> for LibraryItem {
    fn from(m: PlexMetadata) -> Self {
        let file_path = m
            .media
            .into_iter()
            .next()
            .and_then(|media| media.parts.into_iter().next())
            .and_then(|part| part.file);

        LibraryItem {
            id: m.rating_key,
            title: m.title,
            file_path,
            genres: tags(m.genres),
            cast: tags(m.roles),
            studio: m.studio.filter(|s| !s.is_empty()),
            collections: tags(m.collections),
            labels: tags(m.labels),
            thumb: m.thumb,
            art: m.art,
        }
    }
}

/// Existing values followed by the new ones, without repeats
fn merged(existing: &[String], added: &[String]) -> Vec<String> {
    let mut all = existing.to_vec();
    for value in added {
        if !all.contains(value) {
            all.push(value.clone());
        }
    }
    all
}

/// Indexed tag parameters for one field, e.g. `genre[0].tag.tag`.
///
/// Plex replaces the whole tag list on edit, so the current tags are sent
/// ahead of the new ones. Fields with nothing new are left untouched.
fn push_tags(params: &mut Vec<(String, String)>, field: &str, existing: &[String], added: &[String]) {
    if added.is_empty() {
        return;
    }
    for (i, value) in merged(existing, added).iter().enumerate() {
        params.push((format!("{}[{}].tag.tag", field, i), value.clone()));
    }
    params.push((format!("{}.locked", field), "1".to_string()));
}

/// Query parameters for a single metadata edit of `current`
pub fn edit_params(current: &LibraryItem, edit: &ItemEdit) -> Vec<(String, String)> {
    let mut params = vec![
        ("type".to_string(), "1".to_string()),
        ("id".to_string(), current.id.clone()),
    ];

    if let Some(title) = &edit.title {
        params.push(("title.value".to_string(), title.clone()));
        params.push(("title.locked".to_string(), "1".to_string()));
    }
    if let Some(studio) = &edit.studio {
        params.push(("studio.value".to_string(), studio.clone()));
        params.push(("studio.locked".to_string(), "1".to_string()));
    }
    if let Some(date) = edit.release_date {
        params.push(("originallyAvailableAt.value".to_string(), date.format("%Y-%m-%d").to_string()));
        params.push(("originallyAvailableAt.locked".to_string(), "1".to_string()));
    }
    push_tags(&mut params, "genre", &current.genres, &edit.genres);
    push_tags(&mut params, "collection", &current.collections, &edit.collections);
    push_tags(&mut params, "label", &current.labels, &edit.labels);

    match &edit.cast {
        Some(CastEdit::Replace(names)) => {
            for (i, name) in names.iter().enumerate() {
                params.push((format!("actor[{}].tag.tag", i), name.clone()));
                params.push((format!("actor[{}].locked", i), "1".to_string()));
            }
            params.push(("actor.locked".to_string(), "1".to_string()));
        }
        Some(CastEdit::Append(names)) if !names.is_empty() => {
            for (i, name) in merged(&current.cast, names).iter().enumerate() {
                params.push((format!("actor[{}].tag.tag", i), name.clone()));
            }
        }
        _ => {}
    }

    params
}

/// Library section on a Plex server
pub struct PlexLibrary {
    client: reqwest::Client,
    base_url: String,
    section_key: String,
}

impl PlexLibrary {
    /// Connect and resolve the named section
    pub async fn connect(url: &str, token: &str, section: &str, timeout_seconds: u64) -> Result<Self, LibraryError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("x-plex-client-identifier", HeaderValue::from_static(CLIENT_IDENTIFIER));
        headers.insert(
            "x-plex-token",
            HeaderValue::from_str(token).map_err(|_| LibraryError::Api {
                status: 0,
                message: "token contains invalid header characters".to_string(),
            })?,
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .default_headers(headers)
            .build()?;
        let base_url = url.trim_end_matches('/').to_string();

        let sections: Envelope<SectionList> =
            Self::get_json(&client, &format!("{}/library/sections", base_url)).await?;
        let directory = sections
            .container
            .directories
            .into_iter()
            .find(|d| d.title == section)
            .ok_or_else(|| LibraryError::SectionNotFound(section.to_string()))?;

        info!("📚 Connected to Plex section '{}' (key {}, {})", directory.title, directory.key, directory.kind);
        Ok(Self {
            client,
            base_url,
            section_key: directory.key,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, LibraryError> {
        debug!("GET {}", url);
        let response = client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LibraryError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LibraryError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn check(response: reqwest::Response) -> Result<(), LibraryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(LibraryError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn rate(&self, id: &str, rating: f64) -> Result<(), LibraryError> {
        let rating = rating.to_string();
        let response = self
            .client
            .put(format!("{}/:/rate", self.base_url))
            .query(&[
                ("key", id),
                ("identifier", "com.plexapp.plugins.library"),
                ("rating", rating.as_str()),
            ])
            .send()
            .await?;
        Self::check(response).await
    }
}

#[async_trait]
impl MediaLibrary for PlexLibrary {
    fn capabilities(&self) -> LibraryCapabilities {
        LibraryCapabilities::default()
    }

    async fn list_items(&self) -> Result<Vec<LibraryItem>, LibraryError> {
        let url = format!("{}/library/sections/{}/all", self.base_url, self.section_key);
        let list: Envelope<MetadataList> = Self::get_json(&self.client, &url).await?;
        Ok(list.container.metadata.into_iter().map(LibraryItem::from).collect())
    }

    async fn item(&self, id: &str) -> Result<LibraryItem, LibraryError> {
        let url = format!("{}/library/metadata/{}", self.base_url, id);
        let list: Envelope<MetadataList> = Self::get_json(&self.client, &url).await?;
        list.container
            .metadata
            .into_iter()
            .next()
            .map(LibraryItem::from)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))
    }

    async fn commit(&self, id: &str, edit: &ItemEdit) -> Result<(), LibraryError> {
        let current = self.item(id).await?;
        let url = format!("{}/library/sections/{}/all", self.base_url, self.section_key);
        let params = edit_params(&current, edit);
        debug!("PUT {} with {} parameters", url, params.len());

        let response = self.client.put(&url).query(&params).send().await?;
        Self::check(response).await?;

        if let Some(rating) = edit.rating {
            if let Err(e) = self.rate(id, rating).await {
                warn!("Rating {} for item {} was not accepted: {}", rating, id, e);
            }
        }
        Ok(())
    }

    async fn upload_poster_url(&self, id: &str, url: &str) -> Result<(), LibraryError> {
        let response = self
            .client
            .post(format!("{}/library/metadata/{}/posters", self.base_url, id))
            .query(&[("url", url)])
            .send()
            .await?;
        Self::check(response).await
    }

    async fn upload_poster_file(&self, id: &str, path: &Path) -> Result<(), LibraryError> {
        let data = tokio::fs::read(path).await?;
        let response = self
            .client
            .post(format!("{}/library/metadata/{}/posters", self.base_url, id))
            .body(data)
            .send()
            .await?;
        Self::check(response).await
    }
}
