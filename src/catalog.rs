use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::model::{Book, Chapter, ChargeRecord, Purchase, SectionHeading, User};
use crate::slug;
use crate::store::{
    BookSlugScope, BookStore, ChapterStore, PurchaseStore, UserSlugScope, UserStore,
};

/// Executes the actual charge. Stripe in production; tests plug in a stub.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        amount: i64,
        token: &str,
        buyer_email: &str,
    ) -> anyhow::Result<ChargeRecord>;
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub name: String,
    pub price: i64,
    pub github_repo: String,
}

#[derive(Debug, Clone)]
pub struct BookEdit {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub github_repo: String,
}

#[derive(Debug, Clone)]
pub struct SignupProfile {
    pub google_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
}

/// Chapter entry for a book's table of contents.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterSummary {
    pub title: String,
    pub slug: String,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookWithChapters {
    #[serde(flatten)]
    pub book: Book,
    pub chapters: Vec<ChapterSummary>,
}

/// A chapter as served to a reader. `html_content` is present only when the
/// paywall allows it; the excerpt is always available.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterView {
    pub title: String,
    pub slug: String,
    pub order: u32,
    pub is_free: bool,
    pub is_purchased: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    pub html_excerpt: String,
    pub sections: Vec<SectionHeading>,
    pub seo_title: String,
    pub seo_description: String,
}

/// Catalog operations over books, chapters, users and purchases. Entities
/// stay plain data; every operation goes through the store traits.
#[derive(Clone)]
pub struct Catalog {
    books: Arc<dyn BookStore>,
    chapters: Arc<dyn ChapterStore>,
    users: Arc<dyn UserStore>,
    purchases: Arc<dyn PurchaseStore>,
}

impl Catalog {
    pub fn new(
        books: Arc<dyn BookStore>,
        chapters: Arc<dyn ChapterStore>,
        users: Arc<dyn UserStore>,
        purchases: Arc<dyn PurchaseStore>,
    ) -> Self {
        Self {
            books,
            chapters,
            users,
            purchases,
        }
    }

    pub async fn list_books(&self, offset: usize, limit: usize) -> anyhow::Result<Vec<Book>> {
        let books = self.books.list().await.context("list books")?;
        Ok(books.into_iter().skip(offset).take(limit).collect())
    }

    /// A book plus its ordered chapter summaries, for building a TOC.
    pub async fn book_by_slug(&self, book_slug: &str) -> anyhow::Result<BookWithChapters> {
        let book = self
            .books
            .get_by_slug(book_slug)
            .await
            .context("look up book")?
            .ok_or_else(|| anyhow::anyhow!("book not found: {book_slug}"))?;

        let chapters = self
            .chapters
            .list_for_book(&book.id)
            .await
            .context("list chapters")?
            .into_iter()
            .map(|c| ChapterSummary {
                title: c.title,
                slug: c.slug,
                order: c.order,
            })
            .collect();

        Ok(BookWithChapters { book, chapters })
    }

    pub async fn add_book(&self, new_book: NewBook) -> anyhow::Result<Book> {
        let book_slug = slug::generate_slug(&BookSlugScope(self.books.as_ref()), &new_book.name)
            .await
            .context("generate book slug")?;

        let book = Book {
            id: uuid::Uuid::new_v4().to_string(),
            name: new_book.name,
            slug: book_slug,
            github_repo: new_book.github_repo,
            github_last_commit_sha: None,
            price: new_book.price,
            created_at: Utc::now(),
        };
        self.books.create(&book).await.context("create book")?;
        Ok(book)
    }

    /// Update name, price and repository. The slug is regenerated only when
    /// the name actually changed, so existing links keep working otherwise.
    pub async fn edit_book(&self, edit: BookEdit) -> anyhow::Result<Book> {
        let mut book = self
            .books
            .get(&edit.id)
            .await
            .context("look up book")?
            .ok_or_else(|| anyhow::anyhow!("book not found: {}", edit.id))?;

        if edit.name != book.name {
            book.slug = slug::generate_slug(&BookSlugScope(self.books.as_ref()), &edit.name)
                .await
                .context("generate book slug")?;
            book.name = edit.name;
        }
        book.price = edit.price;
        book.github_repo = edit.github_repo;

        self.books.update(&book).await.context("update book")?;
        Ok(book)
    }

    /// Buy a book for a user: charge through the gateway, record the
    /// purchase, and remember the book on the user.
    pub async fn buy(
        &self,
        book_id: &str,
        user_id: &str,
        payment_token: &str,
        gateway: &dyn PaymentGateway,
    ) -> anyhow::Result<Purchase> {
        let mut user = self
            .users
            .get(user_id)
            .await
            .context("look up user")?
            .ok_or_else(|| anyhow::anyhow!("user not found: {user_id}"))?;
        let book = self
            .books
            .get(book_id)
            .await
            .context("look up book")?
            .ok_or_else(|| anyhow::anyhow!("book not found: {book_id}"))?;

        if self
            .purchases
            .get(user_id, book_id)
            .await
            .context("check existing purchase")?
            .is_some()
        {
            anyhow::bail!("already bought this book");
        }

        let charge = gateway
            .charge(book.price, payment_token, &user.email)
            .await
            .context("charge payment")?;

        let purchase = Purchase {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            book_id: book.id.clone(),
            amount: book.price,
            charge,
            created_at: Utc::now(),
        };
        self.purchases
            .create(&purchase)
            .await
            .context("record purchase")?;

        if !user.purchased_book_ids.contains(&book.id) {
            user.purchased_book_ids.push(book.id.clone());
            self.users.update(&user).await.context("update user")?;
        }

        Ok(purchase)
    }

    pub async fn purchased_books(&self, user_id: &str) -> anyhow::Result<Vec<Book>> {
        let user = self
            .users
            .get(user_id)
            .await
            .context("look up user")?
            .ok_or_else(|| anyhow::anyhow!("user not found: {user_id}"))?;

        let mut out = Vec::with_capacity(user.purchased_book_ids.len());
        for book_id in &user.purchased_book_ids {
            if let Some(book) = self.books.get(book_id).await.context("look up book")? {
                out.push(book);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Look up a chapter for reading. Paid content is stripped unless the
    /// chapter is free, the reader bought the book, or the reader is an
    /// admin. The excerpt stays readable for everyone.
    pub async fn read_chapter(
        &self,
        book_slug: &str,
        chapter_slug: &str,
        reader: Option<&User>,
    ) -> anyhow::Result<ChapterView> {
        let book = self
            .books
            .get_by_slug(book_slug)
            .await
            .context("look up book")?
            .ok_or_else(|| anyhow::anyhow!("book not found: {book_slug}"))?;
        let chapter = self
            .chapters
            .get_by_slug(&book.id, chapter_slug)
            .await
            .context("look up chapter")?
            .ok_or_else(|| anyhow::anyhow!("chapter not found: {chapter_slug}"))?;

        let is_purchased = match reader {
            Some(user) => {
                user.is_admin
                    || self
                        .purchases
                        .get(&user.id, &book.id)
                        .await
                        .context("check purchase")?
                        .is_some()
            }
            None => false,
        };

        Ok(chapter_view(chapter, is_purchased))
    }

    /// Look up or create the user for an OAuth profile. The first user ever
    /// registered becomes the admin.
    pub async fn register_user(&self, profile: SignupProfile) -> anyhow::Result<User> {
        if let Some(existing) = self
            .users
            .get_by_google_id(&profile.google_id)
            .await
            .context("look up user")?
        {
            return Ok(existing);
        }

        let is_first_user = self.users.count().await.context("count users")? == 0;
        let user_slug = slug::generate_slug(
            &UserSlugScope(self.users.as_ref()),
            &profile.display_name,
        )
        .await
        .context("generate user slug")?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            google_id: profile.google_id,
            email: profile.email,
            slug: user_slug,
            display_name: profile.display_name,
            avatar_url: profile.avatar_url,
            is_admin: is_first_user,
            is_github_connected: false,
            github_access_token: None,
            purchased_book_ids: Vec::new(),
            created_at: Utc::now(),
        };
        self.users.create(&user).await.context("create user")?;
        Ok(user)
    }
}

fn chapter_view(chapter: Chapter, is_purchased: bool) -> ChapterView {
    let unlocked = chapter.is_free || is_purchased;
    ChapterView {
        title: chapter.title,
        slug: chapter.slug,
        order: chapter.order,
        is_free: chapter.is_free,
        is_purchased,
        html_content: unlocked.then_some(chapter.html_content),
        html_excerpt: chapter.html_excerpt,
        sections: chapter.sections,
        seo_title: chapter.seo_title,
        seo_description: chapter.seo_description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalFsStore;

    struct StubGateway;

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn charge(
            &self,
            amount: i64,
            _token: &str,
            _buyer_email: &str,
        ) -> anyhow::Result<ChargeRecord> {
            Ok(ChargeRecord {
                id: "ch_stub".to_owned(),
                amount,
                currency: "usd".to_owned(),
            })
        }
    }

    fn test_catalog(dir: &std::path::Path) -> (Arc<LocalFsStore>, Catalog) {
        let store = Arc::new(LocalFsStore::new(dir));
        let catalog = Catalog::new(store.clone(), store.clone(), store.clone(), store.clone());
        (store, catalog)
    }

    fn profile(google_id: &str, name: &str) -> SignupProfile {
        SignupProfile {
            google_id: google_id.to_owned(),
            email: format!("{google_id}@example.com"),
            display_name: name.to_owned(),
            avatar_url: String::new(),
        }
    }

    #[tokio::test]
    async fn add_book_generates_unique_slugs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, catalog) = test_catalog(dir.path());

        let first = catalog
            .add_book(NewBook {
                name: "Demo Book".to_owned(),
                price: 4900,
                github_repo: "acme/demo-book".to_owned(),
            })
            .await?;
        let second = catalog
            .add_book(NewBook {
                name: "Demo Book".to_owned(),
                price: 4900,
                github_repo: "acme/demo-book-2".to_owned(),
            })
            .await?;

        assert_eq!(first.slug, "demo-book");
        assert_eq!(second.slug, "demo-book-1");
        Ok(())
    }

    #[tokio::test]
    async fn edit_keeps_slug_unless_renamed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, catalog) = test_catalog(dir.path());

        let book = catalog
            .add_book(NewBook {
                name: "Demo Book".to_owned(),
                price: 4900,
                github_repo: "acme/demo-book".to_owned(),
            })
            .await?;

        let repriced = catalog
            .edit_book(BookEdit {
                id: book.id.clone(),
                name: "Demo Book".to_owned(),
                price: 5900,
                github_repo: "acme/demo-book".to_owned(),
            })
            .await?;
        assert_eq!(repriced.slug, "demo-book");
        assert_eq!(repriced.price, 5900);

        let renamed = catalog
            .edit_book(BookEdit {
                id: book.id,
                name: "Better Book".to_owned(),
                price: 5900,
                github_repo: "acme/demo-book".to_owned(),
            })
            .await?;
        assert_eq!(renamed.slug, "better-book");
        Ok(())
    }

    #[tokio::test]
    async fn first_registered_user_is_admin() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, catalog) = test_catalog(dir.path());

        let first = catalog.register_user(profile("g1", "Ada Admin")).await?;
        let second = catalog.register_user(profile("g2", "Rhea Reader")).await?;
        let again = catalog.register_user(profile("g1", "Ada Admin")).await?;

        assert!(first.is_admin);
        assert!(!second.is_admin);
        assert_eq!(again.id, first.id);
        Ok(())
    }

    #[tokio::test]
    async fn buy_rejects_duplicates_and_tracks_ownership() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, catalog) = test_catalog(dir.path());

        let user = catalog.register_user(profile("g1", "Rhea Reader")).await?;
        let book = catalog
            .add_book(NewBook {
                name: "Demo Book".to_owned(),
                price: 4900,
                github_repo: "acme/demo-book".to_owned(),
            })
            .await?;

        let purchase = catalog
            .buy(&book.id, &user.id, "tok_test", &StubGateway)
            .await?;
        assert_eq!(purchase.amount, 4900);

        let err = catalog
            .buy(&book.id, &user.id, "tok_test", &StubGateway)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already bought"));

        let owned = catalog.purchased_books(&user.id).await?;
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id, book.id);
        Ok(())
    }

    #[tokio::test]
    async fn paid_content_is_gated_until_purchase() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (store, catalog) = test_catalog(dir.path());

        let book = catalog
            .add_book(NewBook {
                name: "Demo Book".to_owned(),
                price: 4900,
                github_repo: "acme/demo-book".to_owned(),
            })
            .await?;
        let chapter = Chapter {
            id: "c1".to_owned(),
            book_id: book.id.clone(),
            title: "Getting Started".to_owned(),
            slug: "getting-started".to_owned(),
            github_file_path: "chapter-1.md".to_owned(),
            order: 2,
            is_free: false,
            content: "secret".to_owned(),
            html_content: "<p>secret</p>".to_owned(),
            excerpt: "teaser".to_owned(),
            html_excerpt: "<p>teaser</p>".to_owned(),
            sections: Vec::new(),
            seo_title: String::new(),
            seo_description: String::new(),
            created_at: Utc::now(),
        };
        ChapterStore::create(store.as_ref(), &chapter).await?;

        let anonymous = catalog
            .read_chapter("demo-book", "getting-started", None)
            .await?;
        assert!(anonymous.html_content.is_none());
        assert_eq!(anonymous.html_excerpt, "<p>teaser</p>");

        // First registration takes the admin seat; the reader must not.
        catalog.register_user(profile("g1", "Ada Admin")).await?;
        let reader = catalog.register_user(profile("g2", "Rhea Reader")).await?;
        assert!(!reader.is_admin);
        let locked = catalog
            .read_chapter("demo-book", "getting-started", Some(&reader))
            .await?;
        assert!(locked.html_content.is_none());

        catalog
            .buy(&book.id, &reader.id, "tok_test", &StubGateway)
            .await?;
        let unlocked = catalog
            .read_chapter("demo-book", "getting-started", Some(&reader))
            .await?;
        assert!(unlocked.is_purchased);
        assert_eq!(unlocked.html_content.as_deref(), Some("<p>secret</p>"));
        Ok(())
    }
}
