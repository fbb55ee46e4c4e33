#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod frontmatter;
pub mod github;
pub mod logging;
pub mod markdown;
pub mod model;
pub mod slug;
pub mod store;
pub mod sync;
