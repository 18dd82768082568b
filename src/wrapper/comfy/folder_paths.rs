//! 文件夹路径
//!
//! ComfyUI folder_paths 注册表的本地镜像, 维护 civitai 缩略图文件夹
//! 与 Bjornulf 检查点目录. 路径注册同时同步到 Python 端 folder_paths,
//! 保证宿主与节点看到一致的目录列表

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use lazy_static::lazy_static;
use log::warn;
use pyo3::{
    types::{PyAnyMethods, PyModule},
    PyResult, Python,
};

use crate::core::utils::directory::{filter_files_extensions, recursive_search};

// 缩略图支持的图片扩展名
pub const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp"];

lazy_static! {
    // folder name -> 路径列表, 进程级注册表
    static ref FOLDER_PATHS: Mutex<BTreeMap<String, Vec<PathBuf>>> = Mutex::new(BTreeMap::new());
}

/// 文件夹路径配置结构体
#[derive(Debug)]
pub struct FolderPaths {
    /// 基础路径, ComfyUI 根目录
    base_path: PathBuf,
    /// 模型路径
    model_path: PathBuf,
    /// 输出目录
    output_directory: PathBuf,
    /// 输入目录
    input_directory: PathBuf,
}

impl Default for FolderPaths {
    /// 创建一个默认的 FolderPaths 实例
    fn default() -> Self {
        let base_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_base_directory(base_path)
    }
}

impl FolderPaths {
    /// 创建新的FolderPaths实例
    pub fn from_base_directory(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();

        Self {
            model_path: base_path.join("models"),
            output_directory: base_path.join("output"),
            input_directory: base_path.join("input"),
            base_path,
        }
    }

    /// 获取基础路径
    pub fn base_path(&self) -> PathBuf {
        self.base_path.clone()
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path.clone()
    }

    /// 获取输出目录
    pub fn output_directory(&self) -> PathBuf {
        self.output_directory.clone()
    }

    /// 获取输入目录
    pub fn input_directory(&self) -> PathBuf {
        self.input_directory.clone()
    }
}

impl FolderPaths {
    /// 添加模型文件夹路径
    pub fn add_model_folder_path(&self, folder_name: &str, full_folder_path: PathBuf) {
        let mut registry = match FOLDER_PATHS.lock() {
            Ok(v) => v,
            Err(e) => {
                warn!("folder path registry poisoned, {e}");
                e.into_inner()
            }
        };

        let paths = registry.entry(folder_name.to_string()).or_default();
        if !paths.contains(&full_folder_path) {
            paths.push(full_folder_path);
        }
    }

    /// 获取注册的文件夹路径列表
    pub fn get_folder_paths(&self, folder_name: &str) -> Vec<PathBuf> {
        let registry = match FOLDER_PATHS.lock() {
            Ok(v) => v,
            Err(e) => e.into_inner(),
        };

        registry.get(folder_name).cloned().unwrap_or_default()
    }

    /// 获取完整文件路径
    ///
    /// 在注册的文件夹中查找第一个存在的文件
    pub fn get_full_path(&self, folder_name: &str, filename: &str) -> Option<PathBuf> {
        for folder in self.get_folder_paths(folder_name) {
            let full_path = folder.join(filename);
            if full_path.is_file() {
                return Some(full_path);
            }
        }
        None
    }

    /// 获取文件名列表
    ///
    /// 递归列出注册文件夹下的文件, 按扩展名过滤后排序
    pub fn get_filename_list(&self, folder_name: &str, extensions: &[&str]) -> Vec<String> {
        let mut output = Vec::new();

        for folder in self.get_folder_paths(folder_name) {
            let files = recursive_search(&folder, &[".git"]);
            output.extend(filter_files_extensions(&files, extensions));
        }

        output.sort_unstable();
        output.dedup();
        output
    }
}

impl FolderPaths {
    /// 同步注册到 Python 端 folder_paths
    ///
    /// 与原生注册表保持一致, 宿主的文件列表/缩略图服务依赖该状态
    pub fn register_with_host(&self, py: Python<'_>, folder_name: &str, path: &Path) -> PyResult<()> {
        let folder_paths = PyModule::import(py, "folder_paths")?;
        folder_paths
            .getattr("add_model_folder_path")?
            .call1((folder_name, path.to_string_lossy()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_register_and_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("model_a.png"), b"x")?;
        fs::write(dir.path().join("model_b.txt"), b"x")?;

        let folder_paths = FolderPaths::from_base_directory(dir.path());
        folder_paths.add_model_folder_path("test_thumbs", dir.path().to_path_buf());

        let files = folder_paths.get_filename_list("test_thumbs", &IMAGE_EXTENSIONS);
        assert_eq!(files, vec!["model_a.png".to_string()]);

        let full = folder_paths.get_full_path("test_thumbs", "model_a.png");
        assert!(full.is_some());
        assert!(folder_paths.get_full_path("test_thumbs", "missing.png").is_none());
        Ok(())
    }
}
