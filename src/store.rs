use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use crate::model::{Book, Chapter, Purchase, User};
use crate::slug::SlugScope;

#[async_trait]
pub trait BookStore: Send + Sync {
    /// Record a new book. Fails if the slug is already taken.
    async fn create(&self, book: &Book) -> anyhow::Result<()>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Book>>;
    async fn get_by_slug(&self, slug: &str) -> anyhow::Result<Option<Book>>;
    /// All books, most recently created first.
    async fn list(&self) -> anyhow::Result<Vec<Book>>;
    async fn update(&self, book: &Book) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ChapterStore: Send + Sync {
    /// Record a new chapter. Fails if the owning book already has a chapter
    /// with the same slug or the same file path, even when two writers race.
    async fn create(&self, chapter: &Chapter) -> anyhow::Result<()>;
    /// Overwrite a chapter. A changed slug must still be free within the
    /// owning book.
    async fn update(&self, chapter: &Chapter) -> anyhow::Result<()>;
    async fn get_by_file_path(
        &self,
        book_id: &str,
        github_file_path: &str,
    ) -> anyhow::Result<Option<Chapter>>;
    async fn get_by_slug(&self, book_id: &str, slug: &str) -> anyhow::Result<Option<Chapter>>;
    /// Chapters of one book, ordered by their table-of-contents position.
    async fn list_for_book(&self, book_id: &str) -> anyhow::Result<Vec<Chapter>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Record a new user. Fails if the slug is already taken.
    async fn create(&self, user: &User) -> anyhow::Result<()>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<User>>;
    async fn get_by_google_id(&self, google_id: &str) -> anyhow::Result<Option<User>>;
    async fn get_by_slug(&self, slug: &str) -> anyhow::Result<Option<User>>;
    async fn count(&self) -> anyhow::Result<usize>;
    async fn update(&self, user: &User) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Record a purchase. Fails if one already exists for the same
    /// (user, book) pair; this is the store-level uniqueness constraint
    /// backing the duplicate-purchase guard.
    async fn create(&self, purchase: &Purchase) -> anyhow::Result<()>;
    async fn get(&self, user_id: &str, book_id: &str) -> anyhow::Result<Option<Purchase>>;
    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Purchase>>;
}

/// Global book-slug scope.
pub struct BookSlugScope<'a>(pub &'a dyn BookStore);

#[async_trait]
impl SlugScope for BookSlugScope<'_> {
    async fn is_taken(&self, slug: &str) -> anyhow::Result<bool> {
        Ok(self.0.get_by_slug(slug).await?.is_some())
    }
}

/// Chapter slugs are unique per book, so two books can both have an
/// `introduction` chapter without suffixing.
pub struct ChapterSlugScope<'a> {
    pub store: &'a dyn ChapterStore,
    pub book_id: &'a str,
}

#[async_trait]
impl SlugScope for ChapterSlugScope<'_> {
    async fn is_taken(&self, slug: &str) -> anyhow::Result<bool> {
        Ok(self
            .store
            .get_by_slug(self.book_id, slug)
            .await?
            .is_some())
    }
}

/// Global user-slug scope.
pub struct UserSlugScope<'a>(pub &'a dyn UserStore);

#[async_trait]
impl SlugScope for UserSlugScope<'_> {
    async fn is_taken(&self, slug: &str) -> anyhow::Result<bool> {
        Ok(self.0.get_by_slug(slug).await?.is_some())
    }
}

/// Document store backed by one JSON file per document under a base
/// directory (`books/<id>.json`, `chapters/<id>.json`, ...). Writes go
/// through a tmp-file-and-rename so a crash never leaves a torn document.
///
/// Unique keys (book/user slugs globally, chapter slugs and file paths per
/// book) are backed by marker files under a `slugs/` (resp. `files/`)
/// subdirectory, claimed with `create_new` before the document write. Two
/// writers racing for the same key cannot both claim the marker, so the
/// loser fails instead of silently persisting a duplicate.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    base_dir: PathBuf,
}

impl LocalFsStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn books_dir(&self) -> PathBuf {
        self.base_dir.join("books")
    }

    fn chapters_dir(&self) -> PathBuf {
        self.base_dir.join("chapters")
    }

    fn users_dir(&self) -> PathBuf {
        self.base_dir.join("users")
    }

    fn purchases_dir(&self) -> PathBuf {
        self.base_dir.join("purchases")
    }

    fn purchase_path(&self, user_id: &str, book_id: &str) -> PathBuf {
        self.purchases_dir().join(format!("{user_id}__{book_id}.json"))
    }

    fn book_slug_marker(&self, slug: &str) -> PathBuf {
        self.books_dir().join("slugs").join(slug)
    }

    fn user_slug_marker(&self, slug: &str) -> PathBuf {
        self.users_dir().join("slugs").join(slug)
    }

    fn chapter_slug_marker(&self, book_id: &str, slug: &str) -> PathBuf {
        self.chapters_dir()
            .join("slugs")
            .join(format!("{book_id}__{slug}"))
    }

    fn chapter_file_marker(&self, book_id: &str, github_file_path: &str) -> PathBuf {
        self.chapters_dir()
            .join("files")
            .join(format!("{book_id}__{}", github_file_path.replace('/', "__")))
    }
}

#[async_trait]
impl BookStore for LocalFsStore {
    async fn create(&self, book: &Book) -> anyhow::Result<()> {
        if !claim_marker(&self.book_slug_marker(&book.slug), &book.id).await? {
            anyhow::bail!("book slug already exists: {}", book.slug);
        }
        write_json_atomic(&self.books_dir().join(format!("{}.json", book.id)), book).await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Book>> {
        read_json(&self.books_dir().join(format!("{id}.json"))).await
    }

    async fn get_by_slug(&self, slug: &str) -> anyhow::Result<Option<Book>> {
        let books: Vec<Book> = scan_collection(&self.books_dir()).await?;
        Ok(books.into_iter().find(|b| b.slug == slug))
    }

    async fn list(&self) -> anyhow::Result<Vec<Book>> {
        let mut books: Vec<Book> = scan_collection(&self.books_dir()).await?;
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(books)
    }

    async fn update(&self, book: &Book) -> anyhow::Result<()> {
        let path = self.books_dir().join(format!("{}.json", book.id));
        let previous: Option<Book> = read_json(&path).await?;
        let renamed = previous
            .as_ref()
            .is_some_and(|prev| prev.slug != book.slug);
        if renamed && !claim_marker(&self.book_slug_marker(&book.slug), &book.id).await? {
            anyhow::bail!("book slug already exists: {}", book.slug);
        }
        write_json_atomic(&path, book).await?;
        if renamed {
            if let Some(prev) = previous {
                release_marker(&self.book_slug_marker(&prev.slug)).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChapterStore for LocalFsStore {
    async fn create(&self, chapter: &Chapter) -> anyhow::Result<()> {
        let slug_marker = self.chapter_slug_marker(&chapter.book_id, &chapter.slug);
        if !claim_marker(&slug_marker, &chapter.id).await? {
            anyhow::bail!(
                "chapter slug already exists for book {}: {}",
                chapter.book_id,
                chapter.slug
            );
        }
        let file_marker = self.chapter_file_marker(&chapter.book_id, &chapter.github_file_path);
        if !claim_marker(&file_marker, &chapter.id).await? {
            release_marker(&slug_marker).await?;
            anyhow::bail!(
                "chapter file path already exists for book {}: {}",
                chapter.book_id,
                chapter.github_file_path
            );
        }
        write_json_atomic(
            &self.chapters_dir().join(format!("{}.json", chapter.id)),
            chapter,
        )
        .await
    }

    async fn update(&self, chapter: &Chapter) -> anyhow::Result<()> {
        let path = self.chapters_dir().join(format!("{}.json", chapter.id));
        let previous: Option<Chapter> = read_json(&path).await?;
        let slug_changed = previous
            .as_ref()
            .is_some_and(|prev| prev.slug != chapter.slug);
        if slug_changed {
            let marker = self.chapter_slug_marker(&chapter.book_id, &chapter.slug);
            if !claim_marker(&marker, &chapter.id).await? {
                anyhow::bail!(
                    "chapter slug already exists for book {}: {}",
                    chapter.book_id,
                    chapter.slug
                );
            }
        }
        write_json_atomic(&path, chapter).await?;
        if slug_changed {
            if let Some(prev) = previous {
                release_marker(&self.chapter_slug_marker(&prev.book_id, &prev.slug)).await?;
            }
        }
        Ok(())
    }

    async fn get_by_file_path(
        &self,
        book_id: &str,
        github_file_path: &str,
    ) -> anyhow::Result<Option<Chapter>> {
        let chapters: Vec<Chapter> = scan_collection(&self.chapters_dir()).await?;
        Ok(chapters
            .into_iter()
            .find(|c| c.book_id == book_id && c.github_file_path == github_file_path))
    }

    async fn get_by_slug(&self, book_id: &str, slug: &str) -> anyhow::Result<Option<Chapter>> {
        let chapters: Vec<Chapter> = scan_collection(&self.chapters_dir()).await?;
        Ok(chapters
            .into_iter()
            .find(|c| c.book_id == book_id && c.slug == slug))
    }

    async fn list_for_book(&self, book_id: &str) -> anyhow::Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = scan_collection(&self.chapters_dir()).await?;
        chapters.retain(|c| c.book_id == book_id);
        chapters.sort_by_key(|c| c.order);
        Ok(chapters)
    }
}

#[async_trait]
impl UserStore for LocalFsStore {
    async fn create(&self, user: &User) -> anyhow::Result<()> {
        if !claim_marker(&self.user_slug_marker(&user.slug), &user.id).await? {
            anyhow::bail!("user slug already exists: {}", user.slug);
        }
        write_json_atomic(&self.users_dir().join(format!("{}.json", user.id)), user).await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<User>> {
        read_json(&self.users_dir().join(format!("{id}.json"))).await
    }

    async fn get_by_google_id(&self, google_id: &str) -> anyhow::Result<Option<User>> {
        let users: Vec<User> = scan_collection(&self.users_dir()).await?;
        Ok(users.into_iter().find(|u| u.google_id == google_id))
    }

    async fn get_by_slug(&self, slug: &str) -> anyhow::Result<Option<User>> {
        let users: Vec<User> = scan_collection(&self.users_dir()).await?;
        Ok(users.into_iter().find(|u| u.slug == slug))
    }

    async fn count(&self) -> anyhow::Result<usize> {
        let users: Vec<User> = scan_collection(&self.users_dir()).await?;
        Ok(users.len())
    }

    async fn update(&self, user: &User) -> anyhow::Result<()> {
        write_json_atomic(&self.users_dir().join(format!("{}.json", user.id)), user).await
    }
}

#[async_trait]
impl PurchaseStore for LocalFsStore {
    async fn create(&self, purchase: &Purchase) -> anyhow::Result<()> {
        let path = self.purchase_path(&purchase.user_id, &purchase.book_id);
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create purchases dir: {}", parent.display()))?;

        let data = serde_json::to_vec_pretty(purchase).context("serialize purchase")?;

        // create_new is the uniqueness constraint: a second purchase for the
        // same (user, book) pair fails here even if two writers race.
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                anyhow::bail!(
                    "purchase already exists for user {} and book {}",
                    purchase.user_id,
                    purchase.book_id
                );
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create purchase: {}", path.display()));
            }
        };
        file.write_all(&data)
            .await
            .with_context(|| format!("write purchase: {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, user_id: &str, book_id: &str) -> anyhow::Result<Option<Purchase>> {
        read_json(&self.purchase_path(user_id, book_id)).await
    }

    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Purchase>> {
        let mut purchases: Vec<Purchase> = scan_collection(&self.purchases_dir()).await?;
        purchases.retain(|p| p.user_id == user_id);
        purchases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(purchases)
    }
}

async fn scan_collection<T: serde::de::DeserializeOwned>(dir: &Path) -> anyhow::Result<Vec<T>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read collection dir: {}", dir.display()));
        }
    };

    let mut out = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("scan collection dir: {}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(value) = read_json(&path).await? {
            out.push(value);
        }
    }
    Ok(out)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read: {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse json: {}", path.display()))?;
    Ok(Some(value))
}

/// Claim a unique-key marker with `create_new`. Returns `false` when the
/// key is already held by another document.
async fn claim_marker(path: &Path, owner_id: &str) -> anyhow::Result<bool> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create marker dir: {}", parent.display()))?;

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("claim marker: {}", path.display()));
        }
    };
    file.write_all(owner_id.as_bytes())
        .await
        .with_context(|| format!("write marker: {}", path.display()))?;
    Ok(true)
}

async fn release_marker(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("release marker: {}", path.display())),
    }
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::ChargeRecord;

    fn book(id: &str, slug: &str) -> Book {
        Book {
            id: id.to_owned(),
            name: slug.to_owned(),
            slug: slug.to_owned(),
            github_repo: "acme/demo-book".to_owned(),
            github_last_commit_sha: None,
            price: 4900,
            created_at: Utc::now(),
        }
    }

    fn purchase(user_id: &str, book_id: &str) -> Purchase {
        Purchase {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            book_id: book_id.to_owned(),
            amount: 4900,
            charge: ChargeRecord {
                id: "ch_test".to_owned(),
                amount: 4900,
                currency: "usd".to_owned(),
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn book_roundtrip_and_slug_lookup() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsStore::new(dir.path());

        BookStore::create(&store, &book("b1", "demo-book")).await?;
        let found = BookStore::get_by_slug(&store, "demo-book").await?;
        assert_eq!(found.map(|b| b.id), Some("b1".to_owned()));
        assert!(BookStore::get_by_slug(&store, "missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_purchase_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsStore::new(dir.path());

        PurchaseStore::create(&store, &purchase("u1", "b1")).await?;
        let err = PurchaseStore::create(&store, &purchase("u1", "b1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // A different book for the same user is fine.
        PurchaseStore::create(&store, &purchase("u1", "b2")).await?;
        assert_eq!(store.list_for_user("u1").await?.len(), 2);
        Ok(())
    }

    fn chapter(id: &str, book_id: &str, slug: &str, path: &str) -> Chapter {
        Chapter {
            id: id.to_owned(),
            book_id: book_id.to_owned(),
            title: slug.to_owned(),
            slug: slug.to_owned(),
            github_file_path: path.to_owned(),
            order: 2,
            is_free: false,
            content: String::new(),
            html_content: String::new(),
            excerpt: String::new(),
            html_excerpt: String::new(),
            sections: Vec::new(),
            seo_title: String::new(),
            seo_description: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_chapter_slug_in_one_book_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsStore::new(dir.path());

        ChapterStore::create(&store, &chapter("c1", "b1", "overview", "chapter-1.md")).await?;
        let err = ChapterStore::create(&store, &chapter("c2", "b1", "overview", "chapter-2.md"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Another book is a separate scope.
        ChapterStore::create(&store, &chapter("c3", "b2", "overview", "chapter-1.md")).await?;
        assert_eq!(store.list_for_book("b1").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_chapter_file_path_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsStore::new(dir.path());

        ChapterStore::create(&store, &chapter("c1", "b1", "overview", "chapter-1.md")).await?;
        let err = ChapterStore::create(&store, &chapter("c2", "b1", "other", "chapter-1.md"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file path already exists"));

        // The losing create must not leave its slug claimed.
        ChapterStore::create(&store, &chapter("c3", "b1", "other", "chapter-2.md")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn renaming_a_chapter_frees_its_old_slug() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsStore::new(dir.path());

        ChapterStore::create(&store, &chapter("c1", "b1", "old-title", "chapter-1.md")).await?;
        let mut renamed = chapter("c1", "b1", "new-title", "chapter-1.md");
        renamed.title = "New Title".to_owned();
        ChapterStore::update(&store, &renamed).await?;

        ChapterStore::create(&store, &chapter("c2", "b1", "old-title", "chapter-2.md")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_book_slug_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsStore::new(dir.path());

        BookStore::create(&store, &book("b1", "demo-book")).await?;
        let err = BookStore::create(&store, &book("b2", "demo-book"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        Ok(())
    }

    #[tokio::test]
    async fn chapter_slug_scope_is_per_book() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalFsStore::new(dir.path());

        let scope = ChapterSlugScope {
            store: &store,
            book_id: "b1",
        };
        assert!(!scope.is_taken("introduction").await?);
        Ok(())
    }
}
