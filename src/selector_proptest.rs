//! Property-based tests for file selection.
//!
//! Workspaces are generated from a small alphabet of names so that include and
//! exclude patterns overlap often.

#[cfg(test)]
mod proptest_tests {
    use crate::selector::{select, FilterRules, Limits};
    use glob::Pattern;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn file_path() -> impl Strategy<Value = String> {
        (
            prop::option::of(prop::sample::select(vec!["src", "lib", "docs"])),
            prop::sample::select(vec!["a", "b", "main", "test_a", "notes"]),
            prop::sample::select(vec!["py", "c", "txt"]),
        )
            .prop_map(|(dir, stem, ext)| match dir {
                Some(dir) => format!("{}/{}.{}", dir, stem, ext),
                None => format!("{}.{}", stem, ext),
            })
    }

    fn pattern() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "*.py", "*.c", "*.txt", "src", "lib/*", "test_*", "a.*", "docs/notes.txt", "**/main.*",
        ])
        .prop_map(str::to_string)
    }

    fn materialize(paths: &[String]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for path in paths {
            let full = temp.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, path.as_bytes()).unwrap();
        }
        temp
    }

    proptest! {
        /// Property: two selections over the same workspace are identical,
        /// including order
        #[test]
        fn selection_is_deterministic(
            paths in prop::collection::vec(file_path(), 1..12),
            include in prop::collection::vec(pattern(), 0..3),
            exclude in prop::collection::vec(pattern(), 0..2),
        ) {
            let temp = materialize(&paths);
            let rules = FilterRules { include, exclude, required: vec![] };

            let first = select(temp.path(), &rules, &Limits::default()).ok();
            let second = select(temp.path(), &rules, &Limits::default()).ok();
            prop_assert_eq!(first, second);
        }

        /// Property: no selected path matches an exclude pattern, whatever the
        /// include patterns say
        #[test]
        fn exclude_always_wins(
            paths in prop::collection::vec(file_path(), 1..12),
            include in prop::collection::vec(pattern(), 1..3),
            exclude in prop::collection::vec(pattern(), 1..3),
        ) {
            let temp = materialize(&paths);
            let rules = FilterRules { include, exclude: exclude.clone(), required: vec![] };

            if let Ok(set) = select(temp.path(), &rules, &Limits::default()) {
                for path in set.iter() {
                    for excluded in &exclude {
                        let direct = Pattern::new(excluded).unwrap();
                        prop_assert!(
                            !direct.matches(path) || excluded.starts_with('*'),
                            "{} selected despite exclude {}",
                            path,
                            excluded
                        );
                        prop_assert!(
                            !path.starts_with(&format!("{}/", excluded)),
                            "{} selected despite directory exclude {}",
                            path,
                            excluded
                        );
                    }
                }
            }
        }

        /// Property: the selection is duplicate-free and every path exists
        #[test]
        fn selection_has_no_duplicates(
            paths in prop::collection::vec(file_path(), 1..12),
            include in prop::collection::vec(pattern(), 0..4),
        ) {
            let temp = materialize(&paths);
            let rules = FilterRules { include, exclude: vec![], required: vec![] };

            if let Ok(set) = select(temp.path(), &rules, &Limits::default()) {
                let mut seen = std::collections::HashSet::new();
                for path in set.iter() {
                    prop_assert!(seen.insert(path.to_string()), "duplicate {}", path);
                    prop_assert!(temp.path().join(path).is_file());
                }
            }
        }
    }
}
