use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use regex::Regex;
use tracing::info;

use super::{PendingChanges, PendingChangesError};
use crate::workflows::preload::PreloadEntry;

/// Comment line that closes the one-year bulk section of the list file.
pub const BULK_END_SENTINEL: &str = "    // END OF 1-YEAR BULK HSTS ENTRIES";

const COMMENT_PATTERN: &str = r"^ *//.*";
const ENTRY_PATTERN: &str = r"^    \{.*\},";

/// Counts how often each name ends up in the rewritten list.
#[derive(Debug, Default)]
pub struct DupeTracker {
    seen: HashMap<String, usize>,
}

impl DupeTracker {
    pub fn observe(&mut self, domain: &str) {
        *self.seen.entry(domain.to_string()).or_default() += 1;
    }

    /// Names seen more than once, sorted.
    pub fn dupes(&self) -> Vec<String> {
        let mut dupes: Vec<String> = self
            .seen
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(domain, _)| domain.clone())
            .collect();
        dupes.sort();
        dupes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedList {
    pub contents: String,
    pub duplicates: Vec<String>,
}

/// Rewrites the list text: entries being removed are dropped and pending
/// additions are inserted right above [`BULK_END_SENTINEL`]. Only one-line
/// entries are touched; everything else passes through unchanged.
pub fn update_list(
    contents: &str,
    changes: &PendingChanges,
) -> Result<UpdatedList, PendingChangesError> {
    let comment = Regex::new(COMMENT_PATTERN)?;
    let list_entry = Regex::new(ENTRY_PATTERN)?;
    let mut output = String::with_capacity(contents.len());
    let mut dupes = DupeTracker::default();

    let contents = contents.strip_suffix('\n').unwrap_or(contents);
    for line in contents.split('\n') {
        if comment.is_match(line) {
            if line == BULK_END_SENTINEL {
                for domain in changes.pending_additions() {
                    dupes.observe(domain);
                    let _ = writeln!(
                        output,
                        "    {{ \"name\": \"{domain}\", \"policy\": \"bulk-1-year\", \"mode\": \"force-https\", \"include_subdomains\": true }},"
                    );
                }
            }
            output.push_str(line);
            output.push('\n');
            continue;
        }

        if !list_entry.is_match(line) {
            output.push_str(line);
            output.push('\n');
            continue;
        }

        let json = line.strip_suffix(',').unwrap_or(line);
        let entry: PreloadEntry =
            serde_json::from_str(json).map_err(|source| PendingChangesError::Entry {
                line: line.to_string(),
                source,
            })?;
        if !changes.removes(&entry.name) {
            dupes.observe(&entry.name);
            output.push_str(line);
            output.push('\n');
        }
    }

    Ok(UpdatedList {
        contents: output,
        duplicates: dupes.dupes(),
    })
}

/// Applies `changes` to the list file at `path` in place.
pub async fn rewrite_list_file(
    path: &Path,
    changes: &PendingChanges,
) -> Result<UpdatedList, PendingChangesError> {
    let contents = tokio::fs::read_to_string(path).await?;
    info!(path = %path.display(), "removing and adding entries");
    let updated = update_list(&contents, changes)?;
    tokio::fs::write(path, &updated.contents).await?;
    Ok(updated)
}
