// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bulk empty-file creation: one flat directory and one tree.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::TreeShape;
use crate::report::Unit;

use super::TestContext;

/// The flat many-files directory.
#[derive(Debug, Clone)]
pub struct ManyFiles {
    pub dir: PathBuf,
    pub count: u32,
}

impl ManyFiles {
    /// Paths of all files, in creation order.
    pub fn files(&self) -> Vec<PathBuf> {
        (0..self.count).map(|i| self.dir.join(file_name(i))).collect()
    }
}

/// Directories and files of the many-files tree.
#[derive(Debug, Clone, Default)]
pub struct ManyTree {
    /// Root first, then depth-first.
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl ManyTree {
    /// Create the tree directories below `root`. Files are listed but not
    /// created.
    pub fn create_dirs(root: &Path, shape: &TreeShape) -> io::Result<Self> {
        let mut tree = Self::default();
        tree.create_level(root, 0, shape)?;
        for dir in &tree.dirs {
            for i in 0..shape.files_per_dir {
                tree.files.push(dir.join(file_name(i)));
            }
        }
        Ok(tree)
    }

    fn create_level(&mut self, dir: &Path, depth: u32, shape: &TreeShape) -> io::Result<()> {
        fs::create_dir(dir)?;
        self.dirs.push(dir.to_path_buf());
        if depth < shape.depth {
            for i in 0..shape.subdirs_per_dir {
                self.create_level(&dir.join(format!("d{:02}", i)), depth + 1, shape)?;
            }
        }
        Ok(())
    }
}

/// Five digit, zero padded.
pub fn file_name(index: u32) -> String {
    format!("{:05}", index)
}

fn create_empty(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(drop)
}

pub fn run(ctx: &mut TestContext) {
    ctx.report.sub("manyfiles");

    let count = ctx.config.run.many_files;
    let dir = ctx.dirs.path("manyfiles");
    if ctx.report.check_ok(fs::create_dir(&dir), "creating manyfiles").is_none() {
        return;
    }
    let many = ManyFiles { dir, count };

    let start = ctx.profiler.now_ns();
    for path in many.files() {
        if ctx
            .report
            .check_ok(create_empty(&path), format_args!("creating {}", path.display()))
            .is_none()
        {
            return;
        }
    }
    let elapsed = ctx.profiler.now_ns() - start;
    ctx.report.value(
        format!("Creating {} empty files in single directory", count),
        elapsed,
        Unit::Ns,
    );
    ctx.report.value(
        "Create empty file (single dir)",
        elapsed / u64::from(count.max(1)),
        Unit::NsPerOccurrence,
    );
    ctx.many_files = Some(many);

    let shape = ctx.config.run.tree;
    let tree = match ManyTree::create_dirs(&ctx.dirs.path("manytree"), &shape) {
        Ok(tree) => tree,
        Err(e) => {
            ctx.report.failed(format_args!("creating manytree directories: {}", e));
            return;
        }
    };

    let start = ctx.profiler.now_ns();
    let mut created = 0u64;
    for path in &tree.files {
        if ctx
            .report
            .check_ok(create_empty(path), format_args!("creating {}", path.display()))
            .is_none()
        {
            return;
        }
        created += 1;
    }
    let elapsed = ctx.profiler.now_ns() - start;
    ctx.report.value(
        format!("Creating {} empty files in tree", created),
        elapsed,
        Unit::Ns,
    );
    ctx.report.value(
        "Create empty file (tree)",
        elapsed / created.max(1),
        Unit::NsPerOccurrence,
    );
    ctx.report.check(created == shape.total_files(), || {
        format!("created {} tree files, expected {}", created, shape.total_files())
    });

    tracing::debug!(dirs = tree.dirs.len(), files = created, "Many-files tree ready");
    ctx.tree = Some(tree);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tree_layout() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("manytree");
        let shape = TreeShape {
            files_per_dir: 3,
            subdirs_per_dir: 2,
            depth: 2,
        };
        let tree = ManyTree::create_dirs(&root, &shape).unwrap();

        assert_eq!(tree.dirs.len() as u64, shape.directory_count());
        assert_eq!(tree.files.len() as u64, shape.total_files());
        assert_eq!(tree.dirs[0], root);
        assert_eq!(tree.dirs[1], root.join("d00"));
        assert_eq!(tree.dirs[2], root.join("d00").join("d00"));
        assert!(root.join("d01").join("d01").is_dir());
        assert_eq!(tree.files[0], root.join("00000"));
    }

    #[test]
    fn test_file_names_are_padded() {
        assert_eq!(file_name(7), "00007");
        assert_eq!(file_name(123456), "123456");
    }
}
