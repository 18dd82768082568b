//! 目录操作

use std::path::Path;

use walkdir::{DirEntry, WalkDir};

/// 递归搜索目录, 返回相对于搜索目录的文件路径
pub fn recursive_search(directory: &Path, excluded_dir_names: &[&str]) -> Vec<String> {
    let mut files = Vec::new();

    if !directory.is_dir() {
        return files;
    }

    let walker = WalkDir::new(directory)
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e, excluded_dir_names));

    for entry in walker.filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            if let Ok(rel_path) = entry.path().strip_prefix(directory) {
                if let Some(rel_str) = rel_path.to_str() {
                    files.push(rel_str.to_string());
                }
            }
        }
    }

    files
}

/// 检查是否为排除目录
fn is_excluded_dir(entry: &DirEntry, excluded_names: &[&str]) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }

    entry
        .file_name()
        .to_str()
        .map(|name| excluded_names.contains(&name))
        .unwrap_or(false)
}

/// 按扩展名过滤文件列表
///
/// 扩展名带点号, 比较时不区分大小写
pub fn filter_files_extensions(files: &[String], extensions: &[&str]) -> Vec<String> {
    if extensions.is_empty() {
        return files.to_vec();
    }

    files
        .iter()
        .filter(|file| {
            let lower = file.to_lowercase();
            extensions.iter().any(|ext| lower.ends_with(ext))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_recursive_search_and_filter() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("sub/.git"))?;
        fs::write(dir.path().join("a.png"), b"x")?;
        fs::write(dir.path().join("sub/b.JPG"), b"x")?;
        fs::write(dir.path().join("sub/.git/c.png"), b"x")?;
        fs::write(dir.path().join("notes.txt"), b"x")?;

        let mut files = recursive_search(dir.path(), &[".git"]);
        files.sort();
        assert_eq!(files.len(), 3);

        let images = filter_files_extensions(&files, &[".png", ".jpg"]);
        assert_eq!(images.len(), 2);
        Ok(())
    }
}
