use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A book sold through the platform. Content lives in a GitHub repository
/// (`github_repo`, `owner/repo`) and is copied into the store by the sync
/// pipeline; `github_last_commit_sha` records the last synced commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub github_repo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_last_commit_sha: Option<String>,
    /// Price in cents.
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

/// One level-2 heading inside a chapter, used to build the table of contents.
/// `escaped_text` matches the in-page anchor name emitted by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHeading {
    pub text: String,
    pub level: u8,
    pub escaped_text: String,
}

/// A chapter derived from one markdown file in the book's repository.
///
/// Every sync cycle rewrites all derived fields (`html_content`, `sections`,
/// ...) together, so a stored chapter is never partially stale. `slug` and
/// `github_file_path` are unique within the owning book, not globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub book_id: String,
    pub title: String,
    pub slug: String,
    pub github_file_path: String,
    /// Position in the table of contents: introduction.md is 1,
    /// chapter-N.md is N+1.
    pub order: u32,
    pub is_free: bool,
    pub content: String,
    pub html_content: String,
    pub excerpt: String,
    pub html_excerpt: String,
    pub sections: Vec<SectionHeading>,
    pub seo_title: String,
    pub seo_description: String,
    pub created_at: DateTime<Utc>,
}

/// A completed transaction. At most one purchase exists per (user, book)
/// pair; the store enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    /// Amount charged, in cents.
    pub amount: i64,
    pub charge: ChargeRecord,
    pub created_at: DateTime<Utc>,
}

/// Opaque record returned by the payment gateway for a successful charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub google_id: String,
    pub email: String,
    pub slug: String,
    pub display_name: String,
    pub avatar_url: String,
    pub is_admin: bool,
    pub is_github_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_access_token: Option<String>,
    pub purchased_book_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}
