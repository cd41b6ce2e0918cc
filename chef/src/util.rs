// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io;
use std::path::Path;

use fs_err as fs;

pub fn ensure_dir_exists(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Remove a tree if present; a missing tree is not an error
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Path selection over a tree, with subtree semantics: a pattern
/// selects everything below what it matches, and directories leading
/// up to a pattern stay selected so walkers can reach it.
pub struct Filter {
    patterns: Vec<glob::Pattern>,
}

impl Filter {
    /// Compile recipe filter strings; an empty list selects everything
    pub fn new(filters: &[String]) -> Result<Self, glob::PatternError> {
        Ok(Self {
            patterns: filters.iter().map(|f| glob::Pattern::new(f)).collect::<Result<_, _>>()?,
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        let as_prefix = format!("{}/", path.display());

        self.patterns.iter().any(|pattern| {
            path.ancestors()
                .filter(|ancestor| !ancestor.as_os_str().is_empty())
                .any(|ancestor| pattern.matches_path(ancestor))
                || pattern.as_str().starts_with(&as_prefix)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remove_missing_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        remove_dir_if_exists(&dir.path().join("not-there")).unwrap();
    }

    #[test]
    fn empty_filter_selects_everything() {
        let filter = Filter::new(&[]).unwrap();
        assert!(filter.matches(Path::new("bin/tool")));
    }

    #[test]
    fn filter_selects_subtrees() {
        let filter = Filter::new(&["bin".to_owned()]).unwrap();

        assert!(filter.matches(Path::new("bin")));
        assert!(filter.matches(Path::new("bin/tool")));
        assert!(filter.matches(Path::new("bin/nested/deep")));
        assert!(!filter.matches(Path::new("share")));
        assert!(!filter.matches(Path::new("share/doc")));
    }

    #[test]
    fn filter_keeps_directories_leading_to_globs() {
        let filter = Filter::new(&["share/**".to_owned()]).unwrap();

        // `share` itself only matters as the way down to the glob
        assert!(filter.matches(Path::new("share")));
        assert!(filter.matches(Path::new("share/doc/README")));
        assert!(!filter.matches(Path::new("bin")));
    }
}
