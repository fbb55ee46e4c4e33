use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::frontmatter::{self, ChapterAttributes};
use crate::github::ContentSource;
use crate::markdown::{self, MarkdownRenderer};
use crate::model::{Book, Chapter};
use crate::slug;
use crate::store::{BookStore, ChapterSlugScope, ChapterStore};

#[derive(Debug, Error)]
pub enum SyncError {
    /// The requested book does not exist.
    #[error("book not found")]
    NotFound,
    /// The repository's latest commit matches what is already stored, or the
    /// repository has no commits. A short-circuit, not a failure.
    #[error("no change in content")]
    NoChange,
    #[error("invalid chapter source: {0}")]
    Validation(String),
    #[error("content source failure: {0}")]
    Upstream(#[source] anyhow::Error),
    #[error("store failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

/// One repository file after front-matter parsing, ready for chapter sync.
#[derive(Debug, Clone)]
pub struct ChapterFile {
    pub path: String,
    pub attributes: ChapterAttributes,
    pub body: String,
}

/// Table-of-contents position for a recognized chapter path, or `None` for
/// paths the sync ignores. `introduction.md` is 1, `chapter-N.md` is N+1.
pub fn chapter_order(path: &str) -> Option<u32> {
    if path == "introduction.md" {
        return Some(1);
    }
    let digits = path.strip_prefix("chapter-")?.strip_suffix(".md")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().and_then(|n| n.checked_add(1))
}

/// Copies book content from the content source into the store.
///
/// Cheap to clone; per-file work during [`Syncer::sync_book`] runs on cloned
/// handles in concurrent tasks.
#[derive(Clone)]
pub struct Syncer {
    books: Arc<dyn BookStore>,
    chapters: Arc<dyn ChapterStore>,
    source: Arc<dyn ContentSource>,
    renderer: Arc<MarkdownRenderer>,
}

impl Syncer {
    pub fn new(
        books: Arc<dyn BookStore>,
        chapters: Arc<dyn ChapterStore>,
        source: Arc<dyn ContentSource>,
        renderer: Arc<MarkdownRenderer>,
    ) -> Self {
        Self {
            books,
            chapters,
            source,
            renderer,
        }
    }

    /// Synchronize one book against its repository.
    ///
    /// Short-circuits with [`SyncError::NoChange`] when the latest commit
    /// hash matches the stored one. Otherwise every recognized chapter file
    /// is fetched and synced concurrently; a failure in one file is logged
    /// and does not abort its siblings. The stored commit hash is updated
    /// only after all file attempts have settled, so an interrupted sync is
    /// retried in full on the next call.
    pub async fn sync_book(&self, book_id: &str) -> Result<Book, SyncError> {
        let mut book = self
            .books
            .get(book_id)
            .await
            .map_err(SyncError::Persistence)?
            .ok_or(SyncError::NotFound)?;

        let commits = self
            .source
            .list_commits(&book.github_repo, 1)
            .await
            .map_err(SyncError::Upstream)?;
        let Some(last_commit) = commits.first() else {
            return Err(SyncError::NoChange);
        };
        let last_sha = last_commit.sha.clone();
        if book.github_last_commit_sha.as_deref() == Some(last_sha.as_str()) {
            return Err(SyncError::NoChange);
        }

        let entries = self
            .source
            .list_directory(&book.github_repo, "")
            .await
            .map_err(SyncError::Upstream)?;

        let mut tasks = JoinSet::new();
        for entry in entries {
            if !entry.is_file() || chapter_order(&entry.path).is_none() {
                continue;
            }
            let this = self.clone();
            let book = book.clone();
            tasks.spawn(async move {
                match this.fetch_and_sync(&book, &entry.path).await {
                    Ok(_) => tracing::info!(path = entry.path, "content is synced"),
                    Err(err) => {
                        tracing::error!(
                            path = entry.path,
                            error = format!("{err:#}"),
                            "content sync failed"
                        );
                    }
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(?err, "chapter sync task aborted");
            }
        }

        book.github_last_commit_sha = Some(last_sha);
        self.books
            .update(&book)
            .await
            .map_err(SyncError::Persistence)?;
        Ok(book)
    }

    async fn fetch_and_sync(&self, book: &Book, path: &str) -> anyhow::Result<()> {
        let file = self
            .source
            .get_file_content(&book.github_repo, path)
            .await
            .context("fetch file content")?;
        let text = file.decode_text().context("decode file content")?;
        let document = frontmatter::parse(&text).context("parse front matter")?;

        self.sync_chapter(
            book,
            ChapterFile {
                path: path.to_owned(),
                attributes: document.attributes,
                body: document.body,
            },
        )
        .await?;
        Ok(())
    }

    /// Create or overwrite the chapter backed by one repository file.
    ///
    /// An existing chapter (matched on book and file path) has every derived
    /// field recomputed and written in one update; its slug is regenerated
    /// only when the title changed. Derived fields are therefore always
    /// consistent with the stored markdown.
    pub async fn sync_chapter(
        &self,
        book: &Book,
        file: ChapterFile,
    ) -> Result<Chapter, SyncError> {
        let order = chapter_order(&file.path).ok_or_else(|| {
            SyncError::Validation(format!("unrecognized chapter path: {}", file.path))
        })?;

        let html_content = self.renderer.render_html(&file.body);
        let html_excerpt = self.renderer.render_html(&file.attributes.excerpt);
        let sections = markdown::extract_sections(&file.body);

        let existing = self
            .chapters
            .get_by_file_path(&book.id, &file.path)
            .await
            .map_err(SyncError::Persistence)?;

        let scope = ChapterSlugScope {
            store: self.chapters.as_ref(),
            book_id: &book.id,
        };

        match existing {
            None => {
                let chapter_slug = slug::generate_slug(&scope, &file.attributes.title)
                    .await
                    .map_err(SyncError::Persistence)?;
                let chapter = Chapter {
                    id: uuid::Uuid::new_v4().to_string(),
                    book_id: book.id.clone(),
                    title: file.attributes.title,
                    slug: chapter_slug,
                    github_file_path: file.path,
                    order,
                    is_free: file.attributes.is_free,
                    content: file.body,
                    html_content,
                    excerpt: file.attributes.excerpt,
                    html_excerpt,
                    sections,
                    seo_title: file.attributes.seo_title,
                    seo_description: file.attributes.seo_description,
                    created_at: Utc::now(),
                };
                self.chapters
                    .create(&chapter)
                    .await
                    .map_err(SyncError::Persistence)?;
                Ok(chapter)
            }
            Some(mut chapter) => {
                chapter.order = order;
                chapter.is_free = file.attributes.is_free;
                chapter.content = file.body;
                chapter.html_content = html_content;
                chapter.excerpt = file.attributes.excerpt;
                chapter.html_excerpt = html_excerpt;
                chapter.sections = sections;
                chapter.seo_title = file.attributes.seo_title;
                chapter.seo_description = file.attributes.seo_description;
                if chapter.title != file.attributes.title {
                    chapter.slug = slug::generate_slug(&scope, &file.attributes.title)
                        .await
                        .map_err(SyncError::Persistence)?;
                    chapter.title = file.attributes.title;
                }
                self.chapters
                    .update(&chapter)
                    .await
                    .map_err(SyncError::Persistence)?;
                Ok(chapter)
            }
        }
    }
}
