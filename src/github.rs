use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use url::Url;

/// One commit from the repository's history, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoCommit {
    pub sha: String,
}

/// A directory listing entry. `kind` is the content source's type tag
/// (`file`, `dir`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct RepoEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl RepoEntry {
    pub fn is_file(&self) -> bool {
        self.kind == "file"
    }
}

/// Raw file payload. GitHub serves file content base64-encoded, broken into
/// newline-separated chunks.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoFile {
    pub content: String,
}

impl RepoFile {
    /// Decode the base64 payload into UTF-8 text.
    pub fn decode_text(&self) -> anyhow::Result<String> {
        let compact = self
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .context("decode base64 file content")?;
        String::from_utf8(bytes).context("file content is not valid utf-8")
    }
}

/// Where book content comes from. The sync pipeline only ever talks to the
/// repository through this interface.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Latest commits for `repo` (`owner/repo`), newest first, at most `limit`.
    async fn list_commits(&self, repo: &str, limit: u32) -> anyhow::Result<Vec<RepoCommit>>;

    /// Entries of the directory at `path` (empty string for the repo root).
    async fn list_directory(&self, repo: &str, path: &str) -> anyhow::Result<Vec<RepoEntry>>;

    /// Content of the file at `path`, base64-encoded.
    async fn get_file_content(&self, repo: &str, path: &str) -> anyhow::Result<RepoFile>;
}

/// GitHub REST v3 implementation of [`ContentSource`].
#[derive(Debug, Clone)]
pub struct GithubContentSource {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl GithubContentSource {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.github.com";

    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("parse content source base url")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build content source http client")?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    fn endpoint(&self, repo: &str, tail: &str) -> anyhow::Result<Url> {
        let (owner, name) = split_repo(repo)?;
        self.base_url
            .join(&format!("repos/{owner}/{name}/{tail}"))
            .context("build content source url")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> anyhow::Result<T> {
        let mut req = self
            .client
            .get(url.clone())
            .header(USER_AGENT, "bookpress/0.1")
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = self.token.as_deref() {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = req.send().await.with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("content source returned {status} for {url}: {body}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("decode response from {url}"))
    }
}

#[async_trait]
impl ContentSource for GithubContentSource {
    async fn list_commits(&self, repo: &str, limit: u32) -> anyhow::Result<Vec<RepoCommit>> {
        let mut url = self.endpoint(repo, "commits")?;
        url.query_pairs_mut()
            .append_pair("per_page", &limit.to_string());
        self.get_json(url).await
    }

    async fn list_directory(&self, repo: &str, path: &str) -> anyhow::Result<Vec<RepoEntry>> {
        let url = self.endpoint(repo, &format!("contents/{path}"))?;
        self.get_json(url).await
    }

    async fn get_file_content(&self, repo: &str, path: &str) -> anyhow::Result<RepoFile> {
        let url = self.endpoint(repo, &format!("contents/{path}"))?;
        self.get_json(url).await
    }
}

fn split_repo(repo: &str) -> anyhow::Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
        _ => anyhow::bail!("repository must be owner/repo: {repo:?}"),
    }
}
