//! Semantic ordering for declared shim versions.

use std::cmp::Ordering;

/// Compares two dotted versions numerically. A leading `v` and any
/// pre-release suffix after `-` are ignored; missing segments count as zero.
/// Returns `None` when either side is not a dotted number.
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    let left_segments = parse_version_segments(left)?;
    let right_segments = parse_version_segments(right)?;
    let width = left_segments.len().max(right_segments.len());
    let ordering = (0..width)
        .map(|index| {
            let left_value = left_segments.get(index).copied().unwrap_or(0);
            let right_value = right_segments.get(index).copied().unwrap_or(0);
            left_value.cmp(&right_value)
        })
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal);
    Some(ordering)
}

/// True only when `candidate` is strictly newer than `installed`.
pub fn is_strictly_newer(candidate: &str, installed: &str) -> Option<bool> {
    compare_versions(candidate, installed).map(|ordering| ordering == Ordering::Greater)
}

fn parse_version_segments(raw: &str) -> Option<Vec<u64>> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    let core = trimmed
        .split_once('-')
        .map(|(left, _)| left)
        .unwrap_or(trimmed);
    if core.is_empty() {
        return None;
    }
    core.split('.')
        .map(|segment| segment.parse::<u64>().ok())
        .collect()
}
