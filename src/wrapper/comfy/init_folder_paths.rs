//! 初始化文件路径
//!
//! 模块导入阶段执行一次: 注册 Bjornulf 检查点目录与 civitai 缩略图文件夹,
//! 并在 input 目录下创建对应的符号链接

use std::{fs, path::PathBuf};

use log::error;
use pyo3::{PyResult, Python};

use crate::{core::utils::symlink::create_symlink_logged, wrapper::comfy::folder_paths::FolderPaths};

/// civitai 资源所在的自定义节点目录名
pub const CUSTOM_NODE_DIRNAME: &str = "Bjornulf_custom_nodes";

/// Bjornulf 检查点子目录
pub const CHECKPOINT_SUBDIR: &str = "Bjornulf_civitAI";

/// 缩略图文件夹, 文件夹名与 civitai 目录下的子路径一致
pub const THUMBNAIL_FOLDERS: [&str; 10] = [
    "sdxl_1.0",
    "sd_1.5",
    "pony",
    "flux.1_d",
    "flux.1_s",
    "lora_sdxl_1.0",
    "lora_sd_1.5",
    "lora_pony",
    "lora_flux.1_d",
    "lora_hunyuan_video",
];

/// civitai 资源基础路径
///
/// 缩略图与解析后的模型清单都位于该目录下
pub fn civitai_base_path(folder_paths: &FolderPaths) -> PathBuf {
    folder_paths
        .base_path()
        .join("custom_nodes")
        .join(CUSTOM_NODE_DIRNAME)
        .join("civitai")
}

/// 模型清单所在路径
pub fn parsed_models_path(folder_paths: &FolderPaths) -> PathBuf {
    civitai_base_path(folder_paths)
}

/// Bjornulf 检查点目录
pub fn bjornulf_checkpoint_path(folder_paths: &FolderPaths) -> PathBuf {
    folder_paths
        .model_path()
        .join("checkpoints")
        .join(CHECKPOINT_SUBDIR)
}

/// 初始化文件路径
pub fn apply_custom_paths() {
    let folder_paths = FolderPaths::default();

    // 注册 Bjornulf 检查点目录
    let checkpoint_path = bjornulf_checkpoint_path(&folder_paths);
    if let Err(e) = fs::create_dir_all(&checkpoint_path) {
        error!("failed to create checkpoint dir {}, {e}", checkpoint_path.display());
    }
    folder_paths.add_model_folder_path("checkpoints", checkpoint_path);

    // 注册缩略图文件夹并创建 input 符号链接
    let civitai_base = civitai_base_path(&folder_paths);
    let input_dir = folder_paths.input_directory();
    if let Err(e) = fs::create_dir_all(&input_dir) {
        error!("failed to create input dir {}, {e}", input_dir.display());
    }

    for folder_name in THUMBNAIL_FOLDERS {
        let source = civitai_base.join(folder_name);
        folder_paths.add_model_folder_path(folder_name, source.clone());
        create_symlink_logged(&source, &input_dir.join(folder_name));
    }
}

/// 把同样的目录注册进宿主 Python 侧的 folder_paths
pub fn register_host_paths(py: Python<'_>) -> PyResult<()> {
    let folder_paths = FolderPaths::default();

    folder_paths.register_with_host(py, "checkpoints", &bjornulf_checkpoint_path(&folder_paths))?;

    let civitai_base = civitai_base_path(&folder_paths);
    for folder_name in THUMBNAIL_FOLDERS {
        folder_paths.register_with_host(py, folder_name, &civitai_base.join(folder_name))?;
    }

    Ok(())
}
