//! Agora CLI
//!
//! Command-line interface for Agora - publish content, comment, vote and
//! browse what is popular.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use agora_core::{Site, VoteType};

mod commands;
mod output;
mod prompt;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "agora")]
#[command(about = "Agora - content, comments, votes and views")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log core activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Act as this identity (defaults to $USER)
    #[arg(long = "as", global = true, value_name = "IDENTITY")]
    identity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage content
    Content {
        #[command(subcommand)]
        command: ContentCommands,
    },
    /// Manage comments on content
    Comment {
        #[command(subcommand)]
        command: CommentCommands,
    },
    /// Toggle a vote
    Vote {
        #[command(subcommand)]
        command: VoteCommands,
    },
    /// Show the most viewed content
    Popular {
        /// Number of entries
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Rank the newest page by engagement rate instead of views
        #[arg(short, long)]
        engagement: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show storage and counter status
    Status,
}

#[derive(Subcommand)]
enum ContentCommands {
    /// Publish new content
    #[command(alias = "add")]
    Create {
        /// Title
        title: String,
        /// Body text
        #[arg(short, long, default_value = "")]
        text: String,
        /// Publish as hidden
        #[arg(long)]
        hidden: bool,
    },
    /// List content, newest first
    #[command(alias = "ls")]
    List {
        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: usize,
        /// Only content published by the current identity
        #[arg(long)]
        mine: bool,
        /// Only hidden content of the current identity
        #[arg(long, conflicts_with = "mine")]
        hidden: bool,
        /// Oldest first
        #[arg(long, conflicts_with_all = ["mine", "hidden"])]
        oldest: bool,
    },
    /// Show content and register a view
    Show {
        /// Content ID (full UUID or prefix)
        id: String,
    },
    /// Search titles
    Search {
        /// Keyword, matched case-insensitively
        keyword: String,
        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },
    /// Delete content
    #[command(alias = "rm")]
    Delete {
        /// Content ID (full UUID or prefix)
        id: String,
    },
    /// Hide or unhide content
    Hide {
        /// Content ID (full UUID or prefix)
        id: String,
        /// Make it visible again
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
enum CommentCommands {
    /// Comment on content
    #[command(alias = "add")]
    Post {
        /// Content ID (full UUID or prefix)
        content_id: String,
        /// Comment text
        text: String,
        /// Reply to this comment
        #[arg(short, long)]
        reply_to: Option<String>,
    },
    /// List threaded comments
    #[command(alias = "ls")]
    List {
        /// Content ID (full UUID or prefix)
        content_id: String,
        /// Maximum comments to fetch
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete a comment
    #[command(alias = "rm")]
    Delete {
        /// Content ID (full UUID or prefix)
        content_id: String,
        /// Comment ID (full UUID or prefix)
        comment_id: String,
    },
}

#[derive(Subcommand)]
enum VoteCommands {
    /// Toggle a vote on content
    Content {
        /// Content ID (full UUID or prefix)
        id: String,
        /// like or dislike
        #[arg(short, long, default_value = "like")]
        kind: VoteType,
    },
    /// Toggle a vote on a comment
    Comment {
        /// Content ID (full UUID or prefix)
        content_id: String,
        /// Comment ID (full UUID or prefix)
        comment_id: String,
        /// like or dislike
        #[arg(short, long, default_value = "like")]
        kind: VoteType,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, database_file, items_per_page,
        /// comments_per_parent, counter_mode)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config doesn't need the site
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, &output),
        };
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let site = Site::open().context("Failed to open the Agora database")?;
    let ctx = commands::Context {
        site: &site,
        identity: resolve_identity(cli.identity),
        cancel: &cancel,
        output: &output,
    };
    debug!(identity = %ctx.identity, "Acting as identity");

    let result = match cli.command {
        Commands::Content { command } => handle_content_command(command, &ctx).await,
        Commands::Comment { command } => handle_comment_command(command, &ctx).await,
        Commands::Vote { command } => handle_vote_command(command, &ctx).await,
        Commands::Popular { limit, engagement } => {
            commands::content::popular(&ctx, limit, engagement).await
        }
        Commands::Status => commands::status::show(&ctx).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    site.close();
    result
}

async fn handle_content_command(command: ContentCommands, ctx: &commands::Context<'_>) -> Result<()> {
    match command {
        ContentCommands::Create {
            title,
            text,
            hidden,
        } => commands::content::create(ctx, title, text, hidden).await,
        ContentCommands::List {
            page,
            mine,
            hidden,
            oldest,
        } => commands::content::list(ctx, page, mine, hidden, oldest).await,
        ContentCommands::Show { id } => commands::content::show(ctx, id).await,
        ContentCommands::Search { keyword, page } => {
            commands::content::search(ctx, keyword, page).await
        }
        ContentCommands::Delete { id } => commands::content::delete(ctx, id).await,
        ContentCommands::Hide { id, undo } => commands::content::hide(ctx, id, !undo).await,
    }
}

async fn handle_comment_command(command: CommentCommands, ctx: &commands::Context<'_>) -> Result<()> {
    match command {
        CommentCommands::Post {
            content_id,
            text,
            reply_to,
        } => commands::comment::post(ctx, content_id, text, reply_to).await,
        CommentCommands::List { content_id, limit } => {
            commands::comment::list(ctx, content_id, limit).await
        }
        CommentCommands::Delete {
            content_id,
            comment_id,
        } => commands::comment::delete(ctx, content_id, comment_id).await,
    }
}

async fn handle_vote_command(command: VoteCommands, ctx: &commands::Context<'_>) -> Result<()> {
    match command {
        VoteCommands::Content { id, kind } => commands::vote::content(ctx, id, kind).await,
        VoteCommands::Comment {
            content_id,
            comment_id,
            kind,
        } => commands::vote::comment(ctx, content_id, comment_id, kind).await,
    }
}

/// Identity from `--as`, falling back to the login name
fn resolve_identity(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("USER").ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Log to stderr; AGORA_LOG overrides the default filter
fn init_logging(verbose: bool) {
    let env_filter = match std::env::var("AGORA_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) if verbose => EnvFilter::new("agora_core=debug,agora_cli=debug"),
        Err(_) => EnvFilter::new("warn"),
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
