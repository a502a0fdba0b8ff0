//! Vote command handlers

use anyhow::Result;

use agora_core::VoteType;

use super::Context;

/// Toggle the current identity's vote on content
pub async fn content(ctx: &Context<'_>, id: String, kind: VoteType) -> Result<()> {
    let id = ctx.content_id(&id).await?;
    let outcome = ctx
        .site
        .toggle_content_vote(&ctx.identity, id, kind, ctx.cancel)
        .await?;
    ctx.output.print_vote(&outcome);
    Ok(())
}

/// Toggle the current identity's vote on a comment
pub async fn comment(
    ctx: &Context<'_>,
    content_id: String,
    comment_id: String,
    kind: VoteType,
) -> Result<()> {
    let parent_id = ctx.content_id(&content_id).await?;
    let comment_id = ctx.comment_id(parent_id, &comment_id).await?;
    let outcome = ctx
        .site
        .toggle_comment_vote(&ctx.identity, parent_id, comment_id, kind, ctx.cancel)
        .await?;
    ctx.output.print_vote(&outcome);
    Ok(())
}
