use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Addon metadata as shown in the marketplace and installed lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddonDescriptor {
    pub addon_id: String,
    pub addon_name: Option<String>,
    pub addon_desc: Option<String>,
    pub addon_version: Option<String>,
    pub addon_author: Option<String>,
    #[serde(default)]
    pub addon_order: i32,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub state: bool,
    #[serde(default)]
    pub has_update: bool,
    #[serde(default)]
    pub install_count: u64,
    pub repo_url: Option<String>,
    pub version_required: Option<String>,
}

/// Compare two version strings numerically, segment by segment. A leading
/// `v`/`V` is ignored; missing segments count as zero; non-numeric segments
/// compare lexically after numeric ones.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| -> Vec<String> {
        v.trim()
            .trim_start_matches(['v', 'V'])
            .split(['.', '-'])
            .map(ToOwned::to_owned)
            .collect()
    };
    let a_parts = split(a);
    let b_parts = split(b);
    let len = a_parts.len().max(b_parts.len());

    for i in 0..len {
        let a_part = a_parts.get(i).map_or("0", String::as_str);
        let b_part = b_parts.get(i).map_or("0", String::as_str);
        let ordering = match (a_part.parse::<u64>(), b_part.parse::<u64>()) {
            (Ok(a_num), Ok(b_num)) => a_num.cmp(&b_num),
            // Numeric segments rank above pre-release words.
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => a_part.cmp(b_part),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Merge a marketplace listing into the local index.
///
/// Entries merge by id; among duplicates the highest version wins. A local
/// installed entry whose marketplace counterpart carries a higher version is
/// tagged `has_update`, keeping the installed version and state.
#[must_use]
pub fn merge_market_addons(
    local: Vec<AddonDescriptor>,
    market: Vec<AddonDescriptor>,
) -> Vec<AddonDescriptor> {
    // Highest-version marketplace entry per id.
    let mut best_remote: HashMap<String, AddonDescriptor> = HashMap::new();
    for remote in market {
        match best_remote.get(&remote.addon_id) {
            Some(existing)
                if compare_versions(
                    existing.addon_version.as_deref().unwrap_or("0"),
                    remote.addon_version.as_deref().unwrap_or("0"),
                ) != Ordering::Less => {}
            _ => {
                best_remote.insert(remote.addon_id.clone(), remote);
            }
        }
    }

    let mut merged = Vec::new();
    for mut entry in local {
        if let Some(remote) = best_remote.remove(&entry.addon_id) {
            let local_version = entry.addon_version.as_deref().unwrap_or("0");
            let remote_version = remote.addon_version.as_deref().unwrap_or("0");
            if compare_versions(remote_version, local_version) == Ordering::Greater {
                entry.has_update = true;
            }
            entry.install_count = remote.install_count;
            if entry.repo_url.is_none() {
                entry.repo_url = remote.repo_url;
            }
        }
        merged.push(entry);
    }

    // Marketplace-only entries are available, not installed.
    let mut remaining: Vec<AddonDescriptor> = best_remote.into_values().collect();
    remaining.sort_by(|a, b| a.addon_id.cmp(&b.addon_id));
    merged.extend(remaining);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, version: &str, installed: bool) -> AddonDescriptor {
        AddonDescriptor {
            addon_id: id.to_owned(),
            addon_version: Some(version.to_owned()),
            installed,
            ..AddonDescriptor::default()
        }
    }

    #[test]
    fn version_ordering() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("v1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "2.0.0-beta"), Ordering::Greater);
    }

    #[test]
    fn merge_tags_updates() {
        let local = vec![descriptor("Wallpaper", "1.0.0", true)];
        let market = vec![descriptor("Wallpaper", "1.1.0", false)];

        let merged = merge_market_addons(local, market);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].has_update);
        assert_eq!(merged[0].addon_version.as_deref(), Some("1.0.0"));
        assert!(merged[0].installed);
    }

    #[test]
    fn merge_keeps_highest_market_version() {
        let market = vec![
            descriptor("Tool", "1.0.0", false),
            descriptor("Tool", "2.0.0", false),
            descriptor("Tool", "1.5.0", false),
        ];

        let merged = merge_market_addons(Vec::new(), market);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].addon_version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn merge_preserves_market_only_entries() {
        let local = vec![descriptor("Installed", "1.0.0", true)];
        let market = vec![descriptor("New", "0.1.0", false)];

        let merged = merge_market_addons(local, market);
        let ids: Vec<&str> = merged.iter().map(|d| d.addon_id.as_str()).collect();
        assert_eq!(ids, vec!["Installed", "New"]);
    }

    #[test]
    fn same_version_is_not_an_update() {
        let local = vec![descriptor("Tool", "1.0.0", true)];
        let market = vec![descriptor("Tool", "1.0.0", false)];
        let merged = merge_market_addons(local, market);
        assert!(!merged[0].has_update);
    }
}
