//! Content command handlers

use anyhow::{bail, Result};

use agora_core::{ContentEntity, SortDirection};

use super::Context;
use crate::prompt::confirm;

/// Publish new content as the current identity
pub async fn create(ctx: &Context<'_>, title: String, text: String, hidden: bool) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Title cannot be empty");
    }

    let mut entity = ContentEntity::new(ctx.profile_id(), &ctx.identity, title.trim(), text);
    entity.set_hidden(hidden);

    let created = ctx.site.publish(entity, ctx.cancel).await?;
    ctx.output.print_content(&created);
    Ok(())
}

/// List a page of content
pub async fn list(
    ctx: &Context<'_>,
    page: usize,
    mine: bool,
    hidden: bool,
    oldest: bool,
) -> Result<()> {
    let (offset, limit) = page_window(ctx, page)?;
    let content = ctx.site.content();

    let items = if mine {
        content
            .list_by_owner(ctx.profile_id(), offset, Some(limit), ctx.cancel)
            .await?
    } else if hidden {
        content
            .list_hidden_by_owner(ctx.profile_id(), offset, Some(limit), ctx.cancel)
            .await?
    } else {
        let direction = if oldest {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        };
        content.list(offset, Some(limit), direction, ctx.cancel).await?
    };

    ctx.output.print_contents(&items);
    Ok(())
}

/// Show content, registering a view by the current identity
pub async fn show(ctx: &Context<'_>, id: String) -> Result<()> {
    let id = ctx.content_id(&id).await?;
    let content = ctx.site.read_content(&ctx.identity, id, ctx.cancel).await?;
    ctx.output.print_content(&content);
    Ok(())
}

/// Search titles for a keyword
pub async fn search(ctx: &Context<'_>, keyword: String, page: usize) -> Result<()> {
    let (offset, limit) = page_window(ctx, page)?;
    let items = ctx
        .site
        .content()
        .search_by_keyword(offset, Some(limit), &keyword, ctx.cancel)
        .await?;
    ctx.output.print_contents(&items);
    Ok(())
}

/// Delete content owned by the current identity
pub async fn delete(ctx: &Context<'_>, id: String) -> Result<()> {
    let id = ctx.content_id(&id).await?;
    let content = ctx.site.content().find_by_id(id, ctx.cancel).await?;
    if content.profile_id != ctx.profile_id() {
        bail!("Only the author can delete this content");
    }

    if ctx.output.should_prompt() && !confirm(&format!("Delete '{}'?", content.title))? {
        ctx.output.message("Cancelled.");
        return Ok(());
    }

    if ctx.site.content().soft_delete(id, ctx.cancel).await? {
        ctx.output.success(&format!("Deleted: {}", content.title));
    } else {
        ctx.output.message("Already deleted.");
    }
    Ok(())
}

/// Hide or unhide content owned by the current identity
pub async fn hide(ctx: &Context<'_>, id: String, hidden: bool) -> Result<()> {
    let id = ctx.content_id(&id).await?;
    let mut content = ctx.site.content().find_by_id(id, ctx.cancel).await?;
    if content.profile_id != ctx.profile_id() {
        bail!("Only the author can change visibility");
    }

    content.set_hidden(hidden);
    let updated = ctx.site.content().replace(content, ctx.cancel).await?;

    let verb = if hidden { "Hidden" } else { "Visible" };
    ctx.output.success(&format!("{}: {}", verb, updated.title));
    Ok(())
}

/// Most viewed content, or the most engaging of the newest page
pub async fn popular(ctx: &Context<'_>, limit: usize, engagement: bool) -> Result<()> {
    let items = if engagement {
        ctx.site.most_engaging(limit, ctx.cancel).await?
    } else {
        ctx.site.popular(limit, ctx.cancel).await?
    };
    ctx.output.print_contents(&items);
    Ok(())
}

/// Offset and limit of a 1-based page
fn page_window(ctx: &Context<'_>, page: usize) -> Result<(usize, usize)> {
    window(page, ctx.site.config().items_per_page)
}

fn window(page: usize, per_page: usize) -> Result<(usize, usize)> {
    if page == 0 {
        bail!("Pages start at 1");
    }
    Ok(((page - 1) * per_page, per_page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        assert_eq!(window(1, 20).unwrap(), (0, 20));
        assert_eq!(window(3, 20).unwrap(), (40, 20));
        assert!(window(0, 20).is_err());
    }
}
