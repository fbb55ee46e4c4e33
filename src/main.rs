use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bookpress::logging::init().context("init logging")?;

    let cli = bookpress::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bookpress::cli::Command::Book {
            command: bookpress::cli::BookCommand::Add(args),
        } => {
            bookpress::commands::book_add(args).await.context("book add")?;
        }
        bookpress::cli::Command::Book {
            command: bookpress::cli::BookCommand::List(args),
        } => {
            bookpress::commands::book_list(args)
                .await
                .context("book list")?;
        }
        bookpress::cli::Command::Book {
            command: bookpress::cli::BookCommand::Show(args),
        } => {
            bookpress::commands::book_show(args)
                .await
                .context("book show")?;
        }
        bookpress::cli::Command::Book {
            command: bookpress::cli::BookCommand::Edit(args),
        } => {
            bookpress::commands::book_edit(args)
                .await
                .context("book edit")?;
        }
        bookpress::cli::Command::Book {
            command: bookpress::cli::BookCommand::Sync(args),
        } => {
            bookpress::commands::book_sync(args)
                .await
                .context("book sync")?;
        }
        bookpress::cli::Command::Chapter {
            command: bookpress::cli::ChapterCommand::Show(args),
        } => {
            bookpress::commands::chapter_show(args)
                .await
                .context("chapter show")?;
        }
    }

    Ok(())
}
