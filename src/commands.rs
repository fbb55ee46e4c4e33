use std::sync::Arc;

use anyhow::Context as _;

use crate::catalog::{BookEdit, Catalog, NewBook};
use crate::cli::{
    BookAddArgs, BookEditArgs, BookListArgs, BookShowArgs, BookSyncArgs, ChapterShowArgs,
};
use crate::github::GithubContentSource;
use crate::markdown::MarkdownRenderer;
use crate::store::{LocalFsStore, UserStore as _};
use crate::sync::{SyncError, Syncer};

fn open_catalog(store_dir: &str) -> (Arc<LocalFsStore>, Catalog) {
    let store = Arc::new(LocalFsStore::new(store_dir));
    let catalog = Catalog::new(store.clone(), store.clone(), store.clone(), store.clone());
    (store, catalog)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

pub async fn book_add(args: BookAddArgs) -> anyhow::Result<()> {
    let (_, catalog) = open_catalog(&args.store);
    let book = catalog
        .add_book(NewBook {
            name: args.name,
            price: args.price,
            github_repo: args.repo,
        })
        .await
        .context("add book")?;
    print_json(&book)
}

pub async fn book_list(args: BookListArgs) -> anyhow::Result<()> {
    let (_, catalog) = open_catalog(&args.store);
    let books = catalog
        .list_books(args.offset, args.limit)
        .await
        .context("list books")?;
    print_json(&books)
}

pub async fn book_show(args: BookShowArgs) -> anyhow::Result<()> {
    let (_, catalog) = open_catalog(&args.store);
    let book = catalog
        .book_by_slug(&args.slug)
        .await
        .context("show book")?;
    print_json(&book)
}

pub async fn book_edit(args: BookEditArgs) -> anyhow::Result<()> {
    let (_, catalog) = open_catalog(&args.store);
    let book = catalog
        .edit_book(BookEdit {
            id: args.id,
            name: args.name,
            price: args.price,
            github_repo: args.repo,
        })
        .await
        .context("edit book")?;
    print_json(&book)
}

pub async fn book_sync(args: BookSyncArgs) -> anyhow::Result<()> {
    let store = Arc::new(LocalFsStore::new(&args.store));
    let source = GithubContentSource::new(&args.github_api, args.token)
        .context("build content source")?;
    let syncer = Syncer::new(
        store.clone(),
        store,
        Arc::new(source),
        Arc::new(MarkdownRenderer::new()),
    );

    match syncer.sync_book(&args.id).await {
        Ok(book) => print_json(&book),
        // Not a failure: the stored content already matches the repository.
        Err(SyncError::NoChange) => {
            println!("no change in content");
            Ok(())
        }
        Err(err) => Err(err).context("sync book"),
    }
}

pub async fn chapter_show(args: ChapterShowArgs) -> anyhow::Result<()> {
    let (store, catalog) = open_catalog(&args.store);

    let reader = match args.user.as_deref() {
        Some(user_id) => Some(
            store
                .get(user_id)
                .await
                .context("look up reader")?
                .ok_or_else(|| anyhow::anyhow!("user not found: {user_id}"))?,
        ),
        None => None,
    };

    let view = catalog
        .read_chapter(&args.book, &args.chapter, reader.as_ref())
        .await
        .context("show chapter")?;
    print_json(&view)
}
