//! Outbound push payload

use serde::Serialize;

use crate::revision::{Identity, Revision};

/// Description of the repository, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryMeta {
    pub url: Option<String>,
    pub name: String,
    pub description: String,
    pub owner: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub id: String,
    pub author: Identity,
    pub url: Option<String>,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub before: String,
    pub after: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub repository: RepositoryMeta,
    pub commits: Vec<CommitRecord>,
}

impl Payload {
    /// Branch name: the trailing path segment of the ref.
    pub fn branch(&self) -> &str {
        branch_name(&self.ref_name)
    }
}

pub fn branch_name(ref_name: &str) -> &str {
    ref_name.rsplit('/').next().unwrap_or(ref_name)
}

/// Substitute a commit id into a `%s` URL template.
pub fn commit_url(template: &str, id: &str) -> String {
    template.replacen("%s", id, 1)
}

pub fn build_payload(
    old: &str,
    new: &str,
    ref_name: &str,
    revisions: Vec<Revision>,
    repository: &RepositoryMeta,
    commit_url_template: Option<&str>,
) -> Payload {
    let commits = revisions
        .into_iter()
        .map(|r| CommitRecord {
            url: commit_url_template.map(|t| commit_url(t, &r.id)),
            id: r.id,
            author: r.author,
            message: r.message,
            timestamp: r.timestamp,
        })
        .collect();

    Payload {
        before: old.to_string(),
        after: new.to_string(),
        ref_name: ref_name.to_string(),
        repository: repository.clone(),
        commits,
    }
}
