//! Command handlers

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agora_core::{normalize_key, Site, SortDirection};

use crate::output::Output;

pub mod comment;
pub mod config;
pub mod content;
pub mod status;
pub mod vote;

/// Everything a handler needs for one invocation
pub struct Context<'a> {
    pub site: &'a Site,
    pub identity: String,
    pub cancel: &'a CancellationToken,
    pub output: &'a Output,
}

impl Context<'_> {
    /// Stable profile id derived from the identity
    pub fn profile_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, normalize_key(&self.identity).as_bytes())
    }

    /// Resolve a content ID (full UUID or prefix of a listed one)
    pub async fn content_id(&self, id: &str) -> Result<Uuid> {
        if let Ok(uuid) = Uuid::parse_str(id) {
            return Ok(uuid);
        }

        let all = self
            .site
            .content()
            .list(0, None, SortDirection::Descending, self.cancel)
            .await?;
        let candidates: Vec<_> = all.iter().map(|c| (c.id, c.title.as_str())).collect();
        match_prefix("content", id, &candidates)
    }

    /// Resolve a comment ID within the comments of `parent_id`
    pub async fn comment_id(&self, parent_id: Uuid, id: &str) -> Result<Uuid> {
        if let Ok(uuid) = Uuid::parse_str(id) {
            return Ok(uuid);
        }

        let comments = self
            .site
            .comments()
            .partition(parent_id, self.cancel)
            .await?
            .list(0, None, SortDirection::Ascending, self.cancel)
            .await?;
        let candidates: Vec<_> = comments.iter().map(|c| (c.id, c.text.as_str())).collect();
        match_prefix("comment", id, &candidates)
    }
}

fn match_prefix(kind: &str, prefix: &str, candidates: &[(Uuid, &str)]) -> Result<Uuid> {
    let matches: Vec<_> = candidates
        .iter()
        .filter(|(id, _)| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => bail!("No {} found matching: {}", kind, prefix),
        [(id, _)] => Ok(*id),
        _ => {
            eprintln!("Multiple {}s match '{}':", kind, prefix);
            for (id, label) in &matches {
                eprintln!("  {} - {}", id, label);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
