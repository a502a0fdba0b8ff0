//! Comment command handlers

use anyhow::{bail, Result};

use agora_core::CommentEntity;

use super::Context;

/// Comment on content, optionally as a reply
pub async fn post(
    ctx: &Context<'_>,
    content_id: String,
    text: String,
    reply_to: Option<String>,
) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Comment text cannot be empty");
    }

    let parent_id = ctx.content_id(&content_id).await?;
    let mut comment = CommentEntity::new(parent_id, ctx.profile_id(), &ctx.identity, text);
    if let Some(reply_to) = reply_to {
        comment = comment.replying_to(ctx.comment_id(parent_id, &reply_to).await?);
    }

    let created = ctx.site.post_comment(parent_id, comment, ctx.cancel).await?;
    ctx.output.print_comment(&created);
    Ok(())
}

/// List comments as threads
pub async fn list(ctx: &Context<'_>, content_id: String, limit: Option<usize>) -> Result<()> {
    let parent_id = ctx.content_id(&content_id).await?;
    let threads = ctx
        .site
        .threaded_comments(parent_id, limit, ctx.cancel)
        .await?;
    ctx.output.print_threads(&threads);
    Ok(())
}

/// Delete a comment written by the current identity
pub async fn delete(ctx: &Context<'_>, content_id: String, comment_id: String) -> Result<()> {
    let parent_id = ctx.content_id(&content_id).await?;
    let comment_id = ctx.comment_id(parent_id, &comment_id).await?;

    let partition = ctx.site.comments().partition(parent_id, ctx.cancel).await?;
    let comment = partition.find_by_id(comment_id, ctx.cancel).await?;
    if comment.profile_id != ctx.profile_id() {
        bail!("Only the author can delete this comment");
    }

    if ctx
        .site
        .delete_comment(parent_id, comment_id, ctx.cancel)
        .await?
    {
        ctx.output.success("Comment deleted");
    } else {
        ctx.output.message("Already deleted.");
    }
    Ok(())
}
