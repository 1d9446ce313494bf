//! Source-to-destination identity mapping.
//!
//! Users are matched across workspaces by lowercased email address. A
//! source user with no email, or with an email absent from the
//! destination roster, stays unmapped; their messages are still replayed
//! with the source display name, just without a destination identity.

use std::collections::HashMap;

use tracing::info;

use crate::model::UserRecord;

/// Destination identity of a source user, if one was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedUser {
    Mapped { dest_id: String },
    Unmapped,
}

#[derive(Debug, Clone)]
struct IdentityEntry {
    mapping: MappedUser,
    display_name: String,
    image_url: Option<String>,
}

/// Immutable lookup table built once from both rosters.
pub struct IdentityMap {
    entries: HashMap<String, IdentityEntry>,
}

impl IdentityMap {
    pub fn build(source: &[UserRecord], dest: &[UserRecord]) -> Self {
        let by_email: HashMap<String, &UserRecord> = dest
            .iter()
            .filter_map(|u| u.email.as_deref().map(|e| (e.to_lowercase(), u)))
            .collect();

        let mut entries = HashMap::new();
        for user in source {
            let mapping = user
                .email
                .as_deref()
                .and_then(|e| by_email.get(&e.to_lowercase()))
                .map(|d| MappedUser::Mapped {
                    dest_id: d.id.clone(),
                })
                .unwrap_or(MappedUser::Unmapped);
            entries.insert(
                user.id.clone(),
                IdentityEntry {
                    mapping,
                    display_name: user.best_name(),
                    image_url: user.image_url.clone(),
                },
            );
        }

        let map = Self { entries };
        info!(
            mapped = map.mapped_count(),
            unmapped = map.unmapped_count(),
            "identity map built"
        );
        map
    }

    pub fn lookup(&self, source_id: &str) -> MappedUser {
        self.entries
            .get(source_id)
            .map(|e| e.mapping.clone())
            .unwrap_or(MappedUser::Unmapped)
    }

    /// Destination id for a mapped source user, `None` when unmapped.
    pub fn dest_id(&self, source_id: &str) -> Option<String> {
        match self.lookup(source_id) {
            MappedUser::Mapped { dest_id } => Some(dest_id),
            MappedUser::Unmapped => None,
        }
    }

    /// Display name for attribution. Unknown ids fall back to the raw id
    /// so a roster gap never drops attribution entirely.
    pub fn display_name_for(&self, source_id: &str) -> String {
        self.entries
            .get(source_id)
            .map(|e| e.display_name.clone())
            .unwrap_or_else(|| source_id.to_string())
    }

    pub fn image_url_for(&self, source_id: &str) -> Option<&str> {
        self.entries.get(source_id)?.image_url.as_deref()
    }

    pub fn mapped_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.mapping, MappedUser::Mapped { .. }))
            .count()
    }

    pub fn unmapped_count(&self) -> usize {
        self.entries.len() - self.mapped_count()
    }
}
