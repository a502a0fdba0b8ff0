//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use agora_core::{CommentEntity, CommentThread, ContentEntity, ToggleOutcome};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single piece of content
    pub fn print_content(&self, content: &ContentEntity) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", content.id);
                println!("Title:    {}", content.title);
                println!("Author:   {}", content.profile_name);
                if content.hidden {
                    println!("Hidden:   yes");
                }
                println!(
                    "Counts:   {} views, {} likes, {} comments",
                    content.views_count, content.likes_count, content.comments_count
                );
                println!(
                    "Created:  {}",
                    content.timestamps.created_at.format("%Y-%m-%d %H:%M")
                );
                if let Some(updated) = content.timestamps.updated_at {
                    println!("Updated:  {}", updated.format("%Y-%m-%d %H:%M"));
                }
                if !content.text.is_empty() {
                    println!();
                    println!("{}", content.text);
                }
            }
            OutputFormat::Json => print_json(content),
            OutputFormat::Quiet => println!("{}", content.id),
        }
    }

    /// Print a list of content
    pub fn print_contents(&self, contents: &[ContentEntity]) {
        match self.format {
            OutputFormat::Human => {
                if contents.is_empty() {
                    println!("No content found.");
                    return;
                }
                for content in contents {
                    println!(
                        "{} | {} | {} | {}v {}l {}c",
                        short_id(&content.id.to_string()),
                        truncate(&content.title, 35),
                        truncate(&content.profile_name, 15),
                        content.views_count,
                        content.likes_count,
                        content.comments_count
                    );
                }
                println!("\n{} item(s)", contents.len());
            }
            OutputFormat::Json => print_json(&contents),
            OutputFormat::Quiet => {
                for content in contents {
                    println!("{}", content.id);
                }
            }
        }
    }

    /// Print a single comment
    pub fn print_comment(&self, comment: &CommentEntity) {
        match self.format {
            OutputFormat::Human => println!("{}", comment_line(comment)),
            OutputFormat::Json => print_json(comment),
            OutputFormat::Quiet => println!("{}", comment.id),
        }
    }

    /// Print threaded comments
    pub fn print_threads(&self, threads: &[CommentThread]) {
        match self.format {
            OutputFormat::Human => {
                if threads.is_empty() {
                    println!("No comments yet.");
                    return;
                }
                for thread in threads {
                    println!("{}", comment_line(&thread.comment));
                    for reply in &thread.replies {
                        println!("    └ {}", comment_line(reply));
                    }
                }
                let replies: usize = threads.iter().map(|t| t.replies.len()).sum();
                println!("\n{} thread(s), {} repl(ies)", threads.len(), replies);
            }
            OutputFormat::Json => print_json(&threads),
            OutputFormat::Quiet => {
                for thread in threads {
                    println!("{}", thread.comment.id);
                    for reply in &thread.replies {
                        println!("{}", reply.id);
                    }
                }
            }
        }
    }

    /// Print the result of a vote toggle
    pub fn print_vote(&self, outcome: &ToggleOutcome) {
        match self.format {
            OutputFormat::Human => {
                println!("Vote: {} ({} like(s))", outcome.state, outcome.likes_count);
            }
            OutputFormat::Json => print_json(outcome),
            OutputFormat::Quiet => println!("{}", outcome.likes_count),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode output as JSON: {}", e),
    }
}

fn comment_line(comment: &CommentEntity) -> String {
    format!(
        "{} [{}] {}: {} (+{})",
        short_id(&comment.id.to_string()),
        comment.timestamps.created_at.format("%Y-%m-%d %H:%M"),
        comment.profile_name,
        truncate_line(&comment.text, 60),
        comment.votes_count
    )
}

/// First eight characters of an id
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("lämpchen und mehr", 8), "lämpc...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0191d2a8-7c4e"), "0191d2a8");
        assert_eq!(short_id("abc"), "abc");
    }
}
