//! Duplicate detection and automatic resolution.
//!
//! Groups are always recomputed wholesale from the current records; there is
//! no incremental maintenance.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::Record;

const GROUP_ID_HEX_LEN: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Number of keys shared by two or more live records.
    pub groups: usize,
    /// Records flagged as duplicates across all groups.
    pub duplicates: usize,
}

/// Trimmed, case-folded primary query text.
pub fn normalize_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Stable group identifier for a normalized key.
pub fn group_id_for(key: &str) -> String {
    let digest = blake3::hash(key.as_bytes());
    let mut id = hex::encode(digest.as_bytes());
    id.truncate(GROUP_ID_HEX_LEN);
    format!("dup-{id}")
}

/// Resets and recomputes duplicate flags in place. Discarded records never
/// join a group and blank keys never collide.
pub fn analyze(records: &mut [Record]) -> DuplicateReport {
    let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, rec) in records.iter().enumerate() {
        if rec.is_discarded {
            continue;
        }
        let key = normalize_key(rec.primary_query());
        if key.is_empty() {
            continue;
        }
        by_key.entry(key).or_default().push(i);
    }

    let mut assigned: Vec<Option<String>> = vec![None; records.len()];
    let mut report = DuplicateReport::default();
    for (key, members) in &by_key {
        if members.len() < 2 {
            continue;
        }
        let gid = group_id_for(key);
        report.groups += 1;
        report.duplicates += members.len();
        for &i in members {
            assigned[i] = Some(gid.clone());
        }
    }

    for (rec, gid) in records.iter_mut().zip(assigned) {
        let is_dup = gid.is_some();
        if rec.is_duplicate != is_dup || rec.duplicate_group_id != gid {
            rec.is_duplicate = is_dup;
            rec.duplicate_group_id = gid;
            rec.has_unsaved_changes = true;
        }
    }
    report
}

/// Keeps one representative per current duplicate group and discards the
/// rest. Highest score wins, then the longer answer, then the earlier
/// record. Returns the number of records newly discarded.
pub fn auto_resolve(records: &mut [Record]) -> usize {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, rec) in records.iter().enumerate() {
        if !rec.is_duplicate || rec.is_discarded {
            continue;
        }
        if let Some(gid) = &rec.duplicate_group_id {
            groups.entry(gid.clone()).or_default().push(i);
        }
    }

    let mut discarded = 0;
    for members in groups.values_mut() {
        if members.len() < 2 {
            continue;
        }
        // stable sort: equal entries keep dataset order
        members.sort_by(|&a, &b| {
            let (ra, rb) = (&records[a], &records[b]);
            rb.score
                .cmp(&ra.score)
                .then_with(|| rb.answer.chars().count().cmp(&ra.answer.chars().count()))
        });
        for &i in &members[1..] {
            records[i].is_discarded = true;
            records[i].has_unsaved_changes = true;
            discarded += 1;
        }
    }
    discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn rec(id: &str, query: &str, score: u8, answer: &str) -> Record {
        let mut r = Record::new(id, query, "", answer);
        r.score = score;
        r
    }

    fn partition(records: &[Record]) -> BTreeSet<BTreeSet<String>> {
        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for r in records {
            if let Some(g) = &r.duplicate_group_id {
                groups.entry(g.clone()).or_default().insert(r.id.clone());
            }
        }
        groups.into_values().collect()
    }

    #[test]
    fn groups_by_trimmed_case_folded_query() {
        let mut records = vec![
            rec("1", "What is Rust?", 0, ""),
            rec("2", "  what is rust?  ", 0, ""),
            rec("3", "Something else", 0, ""),
            rec("4", "", 0, ""),
            rec("5", "", 0, ""),
        ];
        let report = analyze(&mut records);
        assert_eq!(report, DuplicateReport { groups: 1, duplicates: 2 });
        assert!(records[0].is_duplicate && records[1].is_duplicate);
        assert_eq!(records[0].duplicate_group_id, records[1].duplicate_group_id);
        assert!(!records[2].is_duplicate);
        assert!(records[3].duplicate_group_id.is_none());
    }

    #[test]
    fn discarded_records_are_excluded_and_flags_reset() {
        let mut records = vec![rec("1", "q", 0, ""), rec("2", "Q", 0, "")];
        analyze(&mut records);
        assert!(records[1].is_duplicate);

        records[1].is_discarded = true;
        let report = analyze(&mut records);
        assert_eq!(report.groups, 0);
        assert!(records.iter().all(|r| !r.is_duplicate && r.duplicate_group_id.is_none()));
    }

    #[test]
    fn analyze_is_idempotent() {
        let mut records = vec![
            rec("1", "a", 0, ""),
            rec("2", "A", 0, ""),
            rec("3", "b", 0, ""),
            rec("4", "b ", 0, ""),
            rec("5", "c", 0, ""),
        ];
        analyze(&mut records);
        let first = partition(&records);
        analyze(&mut records);
        assert_eq!(first, partition(&records));
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn auto_resolve_keeps_best_and_is_idempotent() {
        let mut records = vec![
            rec("1", "q", 3, "short"),
            rec("2", "q", 5, "x"),
            rec("3", "q", 5, "much longer answer"),
            rec("4", "other", 1, ""),
        ];
        analyze(&mut records);
        assert_eq!(auto_resolve(&mut records), 2);
        assert!(!records[2].is_discarded);
        assert!(records[0].is_discarded && records[1].is_discarded);
        assert!(!records[3].is_discarded);

        assert_eq!(auto_resolve(&mut records), 0);
    }

    #[test]
    fn auto_resolve_tie_break_is_stable() {
        let build = || {
            let mut r = vec![rec("a", "same", 2, "abc"), rec("b", "same", 2, "xyz")];
            analyze(&mut r);
            r
        };
        let mut first = build();
        let mut second = build();
        auto_resolve(&mut first);
        auto_resolve(&mut second);
        assert!(!first[0].is_discarded && first[1].is_discarded);
        assert_eq!(first, second);
    }
}
