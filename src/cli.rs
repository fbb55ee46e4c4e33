use clap::{Args, Parser, Subcommand};

use crate::github::GithubContentSource;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Book {
        #[command(subcommand)]
        command: BookCommand,
    },
    Chapter {
        #[command(subcommand)]
        command: ChapterCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum BookCommand {
    Add(BookAddArgs),
    List(BookListArgs),
    Show(BookShowArgs),
    Edit(BookEditArgs),
    Sync(BookSyncArgs),
}

#[derive(Debug, Subcommand)]
pub enum ChapterCommand {
    Show(ChapterShowArgs),
}

#[derive(Debug, Args)]
pub struct BookAddArgs {
    /// Document store directory.
    #[arg(long)]
    pub store: String,

    /// Book name; the slug is derived from it.
    #[arg(long)]
    pub name: String,

    /// Price in cents.
    #[arg(long)]
    pub price: i64,

    /// Content repository as owner/repo.
    #[arg(long)]
    pub repo: String,
}

#[derive(Debug, Args)]
pub struct BookListArgs {
    /// Document store directory.
    #[arg(long)]
    pub store: String,

    /// Number of books to skip.
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Maximum number of books to return.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct BookShowArgs {
    /// Document store directory.
    #[arg(long)]
    pub store: String,

    /// Book slug.
    #[arg(long)]
    pub slug: String,
}

#[derive(Debug, Args)]
pub struct BookEditArgs {
    /// Document store directory.
    #[arg(long)]
    pub store: String,

    /// Book id.
    #[arg(long)]
    pub id: String,

    /// New name; renaming regenerates the slug.
    #[arg(long)]
    pub name: String,

    /// Price in cents.
    #[arg(long)]
    pub price: i64,

    /// Content repository as owner/repo.
    #[arg(long)]
    pub repo: String,
}

#[derive(Debug, Args)]
pub struct BookSyncArgs {
    /// Document store directory.
    #[arg(long)]
    pub store: String,

    /// Book id.
    #[arg(long)]
    pub id: String,

    /// Access token for the content source.
    #[arg(long)]
    pub token: Option<String>,

    /// Content source API base URL.
    #[arg(long, default_value = GithubContentSource::DEFAULT_BASE_URL)]
    pub github_api: String,
}

#[derive(Debug, Args)]
pub struct ChapterShowArgs {
    /// Document store directory.
    #[arg(long)]
    pub store: String,

    /// Owning book's slug.
    #[arg(long)]
    pub book: String,

    /// Chapter slug.
    #[arg(long)]
    pub chapter: String,

    /// Reader's user id; anonymous when omitted.
    #[arg(long)]
    pub user: Option<String>,
}
