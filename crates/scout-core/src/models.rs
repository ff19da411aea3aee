use std::collections::BTreeSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Outcome of a tiered content fetch. Immutable once returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub success: bool,
    pub text: String,
    pub html: String,
    pub status_code: Option<u16>,
    pub used_fallback: bool,
    pub fallback_reason: Option<String>,
    pub final_url: String,
    pub error: Option<String>,
}

/// Logins found by a bounded follow-graph traversal.
///
/// `d2` never contains the seed or any depth-1 login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub seed: String,
    pub d1_followers: BTreeSet<String>,
    pub d1_following: BTreeSet<String>,
    pub d2: BTreeSet<String>,
    pub seed_processed: bool,
    /// Depth-1 users whose pages were actually walked.
    pub d1_processed: usize,
    /// Unique depth-1 users discovered.
    pub d1_total: usize,
}

impl DiscoveryResult {
    pub fn empty(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            ..Default::default()
        }
    }

    /// Union of both depth-1 directions.
    pub fn d1_all(&self) -> BTreeSet<String> {
        self.d1_followers
            .union(&self.d1_following)
            .cloned()
            .collect()
    }

    /// Every discovered login, depth 1 first, without duplicates.
    pub fn all_logins(&self) -> Vec<String> {
        let d1 = self.d1_all();
        let mut out: Vec<String> = d1.iter().cloned().collect();
        out.extend(self.d2.iter().filter(|l| !d1.contains(*l)).cloned());
        out
    }
}

/// Result of an insert-if-absent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub inserted: bool,
}

/// Raw page text to persist for a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRawText {
    pub candidate_id: Option<i64>,
    pub url: String,
    pub text: String,
    /// SHA-256 of `text`
    pub content_hash: String,
    /// `homepage` or `homepage_rendered`
    pub source_tag: String,
}

/// Researcher profile scraped from an OpenReview profile page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpenReviewProfile {
    /// `~First_Last1` style id.
    pub profile_id: String,
    pub profile_url: String,
    pub name: Option<String>,
    pub affiliation: Option<String>,
    pub email: Option<String>,
    pub homepage: Option<String>,
    pub github: Option<String>,
    pub bio: Option<String>,
}

/// A plain HTTP response as seen by the static fetch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
    pub final_url: String,
}

impl PageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Page produced by a headless-browser render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    /// innerText of the first content container with meaningful text.
    pub container_text: Option<String>,
    pub status: Option<u16>,
    pub final_url: String,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
