use std::cmp::Ordering;

use hashbrown::HashMap;
use smol_str::SmolStr;

use crate::file::FileRecord;

/// Sort configuration for a listing projection.
///
/// The two independent switches yield the four comparator variants; the `..`
/// pseudo-entry always sorts first regardless of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    /// Directories sort before files.
    pub dirs_first: bool,
    /// Compare display names byte-wise instead of by collation key.
    pub case_sensitive: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self {
            dirs_first: true,
            case_sensitive: false,
        }
    }
}

impl SortOrder {
    /// Total order over records.
    ///
    /// Never returns `Equal` for records with distinct names: the
    /// case-insensitive variants compare collation keys (which embed the raw
    /// name as a tiebreak) and the case-sensitive variants fall back to the
    /// raw name after the display name.
    pub fn compare(&self, a: &FileRecord, b: &FileRecord) -> Ordering {
        match (a.is_parent_entry(), b.is_parent_entry()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        if self.dirs_first {
            match (a.is_dir(), b.is_dir()) {
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                _ => {}
            }
        }

        if self.case_sensitive {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.name().cmp(b.name()))
        } else {
            a.collation_key().cmp(b.collation_key())
        }
    }
}

/// An order-maintaining projection of a folder's records.
///
/// Insertion finds the slot by binary search and reports the position, name
/// lookups are O(1), and swapping the comparator re-sorts stably and returns
/// the old-to-new permutation a row-reorder notification needs.
#[derive(Debug)]
pub struct SortedFileList {
    order: SortOrder,
    records: Vec<FileRecord>,
    by_name: HashMap<SmolStr, FileRecord>,
    by_display_name: HashMap<SmolStr, FileRecord>,
}

impl SortedFileList {
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            records: Vec::new(),
            by_name: HashMap::new(),
            by_display_name: HashMap::new(),
        }
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts a record at its sorted position and returns that position.
    ///
    /// The list does not support duplicate keys: inserting a name that is
    /// already present is a caller bug (remove first on change).
    pub fn insert(&mut self, record: FileRecord) -> usize {
        assert!(
            !self.by_name.contains_key(record.name()),
            "record '{}' inserted twice",
            record.name()
        );

        let position = match self
            .records
            .binary_search_by(|probe| self.order.compare(probe, &record))
        {
            Ok(_) => panic!(
                "comparator reported equality for distinct records (inserting '{}')",
                record.name()
            ),
            Err(position) => position,
        };

        self.by_name.insert(record.name().clone(), record.clone());
        self.by_display_name
            .insert(record.display_name().clone(), record.clone());
        self.records.insert(position, record);
        position
    }

    /// Removes the record with `name`, returning the position it occupied.
    pub fn remove(&mut self, name: &str) -> Option<usize> {
        let position = self.position_of(self.by_name.get(name)?)?;
        let record = self.by_name.remove(name)?;
        self.by_display_name.remove(record.display_name());
        self.records.remove(position);
        Some(position)
    }

    /// Position of a record equivalent to `record` under the current order.
    pub fn position_of(&self, record: &FileRecord) -> Option<usize> {
        self.records
            .binary_search_by(|probe| self.order.compare(probe, record))
            .ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&FileRecord> {
        self.by_name.get(name)
    }

    pub fn find_by_display_name(&self, display_name: &str) -> Option<&FileRecord> {
        self.by_display_name.get(display_name)
    }

    pub fn first(&self) -> Option<&FileRecord> {
        self.records.first()
    }

    /// The record following `record` in display order.
    pub fn next(&self, record: &FileRecord) -> Option<&FileRecord> {
        let position = self.position_of(record)?;
        self.records.get(position + 1)
    }

    pub fn nth(&self, index: usize) -> Option<&FileRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    /// Switches the comparator, stably re-sorting the list.
    ///
    /// Returns the permutation mapping each record's old position to its new
    /// one (`permutation[old] == new`), which is what a row-reorder
    /// notification downstream needs.
    pub fn set_order(&mut self, order: SortOrder) -> Vec<usize> {
        self.order = order;

        let mut by_new_position: Vec<usize> = (0..self.records.len()).collect();
        by_new_position
            .sort_by(|&a, &b| order.compare(&self.records[a], &self.records[b]));

        let mut permutation = vec![0usize; self.records.len()];
        for (new, &old) in by_new_position.iter().enumerate() {
            permutation[old] = new;
        }

        let mut reordered = Vec::with_capacity(self.records.len());
        for &old in &by_new_position {
            reordered.push(self.records[old].clone());
        }
        self.records = reordered;

        permutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Comparators only look at the dir bit, so a pre-stat record works as a
    // plain file.
    fn file(name: &str) -> FileRecord {
        FileRecord::new(name)
    }

    fn dir(name: &str) -> FileRecord {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(name)).unwrap();
        let mut record = FileRecord::new(name);
        record.stat(tmp.path());
        assert!(record.is_dir());
        record
    }

    fn names(list: &SortedFileList) -> Vec<&str> {
        list.iter().map(|r| r.name().as_str()).collect()
    }

    #[test]
    fn keeps_records_in_comparator_order() {
        let mut list = SortedFileList::new(SortOrder::default());
        for name in ["delta", "alpha", "charlie", "bravo"] {
            list.insert(file(name));
        }
        assert_eq!(names(&list), vec!["alpha", "bravo", "charlie", "delta"]);
    }

    #[test]
    fn insert_reports_the_position() {
        let mut list = SortedFileList::new(SortOrder::default());
        assert_eq!(list.insert(file("b")), 0);
        assert_eq!(list.insert(file("a")), 0);
        assert_eq!(list.insert(file("c")), 2);
    }

    #[test]
    fn remove_reports_the_position_and_updates_indexes() {
        let mut list = SortedFileList::new(SortOrder::default());
        for name in ["a", "b", "c"] {
            list.insert(file(name));
        }
        assert_eq!(list.remove("b"), Some(1));
        assert_eq!(names(&list), vec!["a", "c"]);
        assert!(!list.contains("b"));
        assert!(list.find_by_name("b").is_none());
        assert_eq!(list.remove("b"), None);
    }

    #[test]
    fn order_matches_a_direct_sort_through_churn() {
        let mut list = SortedFileList::new(SortOrder::default());
        let mut alive: Vec<String> = Vec::new();

        let steps: &[(&str, bool)] = &[
            ("m", true),
            ("c", true),
            ("x", true),
            ("c", false),
            ("a", true),
            ("q", true),
            ("m", false),
            ("b", true),
        ];
        for &(name, add) in steps {
            if add {
                list.insert(file(name));
                alive.push(name.to_string());
            } else {
                list.remove(name).unwrap();
                alive.retain(|n| n != name);
            }

            let mut expected: Vec<FileRecord> =
                alive.iter().map(|n| file(n)).collect();
            expected.sort_by(|a, b| list.order().compare(a, b));
            let expected: Vec<&str> = expected.iter().map(|r| r.name().as_str()).collect();
            assert_eq!(names(&list), expected);

            for name in &alive {
                let found = list.find_by_name(name).unwrap();
                assert_eq!(found.name(), name.as_str());
                assert!(list.find_by_display_name(found.display_name()).is_some());
            }
        }
    }

    #[test]
    fn parent_entry_sorts_first_regardless_of_names() {
        let tmp = tempfile::tempdir().unwrap();
        let mut list = SortedFileList::new(SortOrder {
            dirs_first: true,
            case_sensitive: false,
        });
        list.insert(file("b"));
        list.insert(file("A"));
        list.insert(FileRecord::parent_entry(tmp.path()));

        assert_eq!(names(&list), vec!["..", "A", "b"]);
        assert!(list.first().unwrap().is_parent_entry());
    }

    #[test]
    fn dirs_first_groups_directories_ahead_of_files() {
        let mut list = SortedFileList::new(SortOrder {
            dirs_first: true,
            case_sensitive: false,
        });
        list.insert(file("aaa"));
        list.insert(dir("zzz"));
        assert_eq!(names(&list), vec!["zzz", "aaa"]);
    }

    #[test]
    fn case_sensitivity_switch_changes_relative_order() {
        let mut insensitive = SortedFileList::new(SortOrder {
            dirs_first: false,
            case_sensitive: false,
        });
        insensitive.insert(file("b"));
        insensitive.insert(file("A"));
        assert_eq!(names(&insensitive), vec!["A", "b"]);

        let mut sensitive = SortedFileList::new(SortOrder {
            dirs_first: false,
            case_sensitive: true,
        });
        sensitive.insert(file("b"));
        sensitive.insert(file("A"));
        assert_eq!(names(&sensitive), vec!["A", "b"]);
        sensitive.insert(file("a"));
        // Byte order puts uppercase before lowercase.
        assert_eq!(names(&sensitive), vec!["A", "a", "b"]);
    }

    #[test]
    fn set_order_returns_the_old_to_new_permutation() {
        let mut list = SortedFileList::new(SortOrder {
            dirs_first: true,
            case_sensitive: false,
        });
        list.insert(dir("dir"));
        list.insert(file("aaa"));
        assert_eq!(names(&list), vec!["dir", "aaa"]);

        let permutation = list.set_order(SortOrder {
            dirs_first: false,
            case_sensitive: false,
        });
        assert_eq!(names(&list), vec!["aaa", "dir"]);
        // "dir" moved 0 -> 1, "aaa" moved 1 -> 0.
        assert_eq!(permutation, vec![1, 0]);
    }

    #[test]
    fn lookups_agree_with_a_direct_scan() {
        let mut list = SortedFileList::new(SortOrder::default());
        for name in ["x", "y", "z"] {
            list.insert(file(name));
        }
        for name in ["x", "y", "z", "w"] {
            let scanned = list.iter().any(|r| r.name() == name);
            assert_eq!(list.contains(name), scanned);
            assert_eq!(list.find_by_name(name).is_some(), scanned);
        }
    }

    #[test]
    fn traversal_walks_in_order() {
        let mut list = SortedFileList::new(SortOrder::default());
        for name in ["c", "a", "b"] {
            list.insert(file(name));
        }
        let first = list.first().unwrap().clone();
        assert_eq!(first.name(), "a");
        let second = list.next(&first).unwrap().clone();
        assert_eq!(second.name(), "b");
        assert_eq!(list.next(&second).unwrap().name(), "c");
        assert_eq!(list.nth(2).map(|r| r.name().as_str()), Some("c"));
    }
}
