//! Status command handler

use anyhow::Result;

use agora_core::{DocumentStore, VIEWS_COLLECTION, VOTES_COLLECTION};

use super::Context;
use crate::output::OutputFormat;

/// Show storage and counter status
pub async fn show(ctx: &Context<'_>) -> Result<()> {
    let config = ctx.site.config();
    let db_path = config.sqlite_path();
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let contents = ctx.site.content().estimated_count(ctx.cancel).await?;
    let votes = ctx.site.store().estimated_count(VOTES_COLLECTION).await?;
    let views = ctx.site.store().estimated_count(VIEWS_COLLECTION).await?;

    match ctx.output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "identity": ctx.identity,
                    "counter_mode": config.counter_mode,
                    "storage": {
                        "data_dir": config.data_dir,
                        "database": db_path,
                        "database_size": db_size
                    },
                    "counts": {
                        "content": contents,
                        "votes": votes,
                        "views": views
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", db_path.display());
        }
        OutputFormat::Human => {
            println!("Agora Status");
            println!("============");
            println!();
            println!("Identity:     {}", ctx.identity);
            println!("Counter mode: {}", config.counter_mode);
            println!();
            println!("Storage:");
            println!("  Location: {}", db_path.display());
            println!("  Size:     {}", human_size(db_size));
            println!();
            println!("Records (approximate):");
            println!("  Content: {}", contents);
            println!("  Votes:   {}", votes);
            println!("  Views:   {}", views);
        }
    }

    Ok(())
}

fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MB");
    }
}
