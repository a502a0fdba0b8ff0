//! Engagement ranking
//!
//! Orders content by how much interaction each view produced. The rate is
//! `(likes + comments) / views`; content nobody has viewed yet rates zero.
//! Equal rates fall back to the view count, then the id, so the order is
//! stable across calls.

use std::cmp::Ordering;

use crate::models::ContentEntity;

/// Interactions per view, or zero when there are no views
pub fn engagement_rate(likes: u64, comments: u64, views: u64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    (likes + comments) as f64 / views as f64
}

/// Rate of one piece of content from its denormalized counters
pub fn content_rate(content: &ContentEntity) -> f64 {
    engagement_rate(
        content.likes_count,
        content.comments_count,
        content.views_count,
    )
}

/// Sort most engaging first
pub fn rank_by_engagement(items: &mut [ContentEntity]) {
    items.sort_by(|a, b| {
        content_rate(b)
            .partial_cmp(&content_rate(a))
            .unwrap_or(Ordering::Equal)
            .then(b.views_count.cmp(&a.views_count))
            .then(a.id.cmp(&b.id))
    });
}
