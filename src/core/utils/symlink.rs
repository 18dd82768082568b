//! 符号链接
//!
//! 在 ComfyUI 的 input 目录下为缩略图文件夹创建符号链接,
//! Windows 上符号链接失败时回退到目录联接 (Junction)

use std::{fs, path::Path};

use log::error;

use crate::error::Error;

/// 在 target 位置创建指向 source 的符号链接
///
/// 已存在的目标会被移除后重建, 保证链接指向当前的源目录
pub fn create_symlink(source: &Path, target: &Path) -> Result<(), Error> {
    if !source.exists() {
        return Err(Error::InvalidDirectory(format!(
            "symlink source does not exist: {}",
            source.display()
        )));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    // 移除已存在的目标, 无论其类型
    match fs::symlink_metadata(target) {
        Ok(metadata) => {
            if metadata.is_dir() && !metadata.file_type().is_symlink() {
                fs::remove_dir_all(target)?;
            } else {
                fs::remove_file(target)?;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    platform_symlink(source, target)
}

#[cfg(unix)]
fn platform_symlink(source: &Path, target: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(source, target)?;
    Ok(())
}

#[cfg(windows)]
fn platform_symlink(source: &Path, target: &Path) -> Result<(), Error> {
    // 符号链接需要管理员权限或开发者模式, 失败时回退到 Junction
    let result = if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, target)
    } else {
        std::os::windows::fs::symlink_file(source, target)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if source.is_dir() {
                log::warn!("symlink failed ({e}), falling back to junction");
                create_junction(source, target)
            } else {
                Err(e.into())
            }
        }
    }
}

#[cfg(windows)]
fn create_junction(source: &Path, target: &Path) -> Result<(), Error> {
    use std::process::Command;

    let status = Command::new("powershell")
        .args([
            "New-Item",
            "-ItemType",
            "Junction",
            "-Path",
            &target.to_string_lossy(),
            "-Value",
            &source.to_string_lossy(),
        ])
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::InvalidDirectory(format!(
            "failed to create junction: {}",
            target.display()
        )))
    }
}

/// 创建链接, 失败只记录日志
///
/// 模块导入阶段调用, 单个链接失败不应阻止节点注册
pub fn create_symlink_logged(source: &Path, target: &Path) {
    if let Err(e) = create_symlink(source, target) {
        error!(
            "failed to create symlink {} -> {}, {e}",
            target.display(),
            source.display()
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_create_symlink_replaces_existing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source_a = dir.path().join("a");
        let source_b = dir.path().join("b");
        let target = dir.path().join("input/link");
        fs::create_dir_all(&source_a)?;
        fs::create_dir_all(&source_b)?;

        create_symlink(&source_a, &target)?;
        assert_eq!(fs::read_link(&target)?, source_a);

        // 重建时指向新的源
        create_symlink(&source_b, &target)?;
        assert_eq!(fs::read_link(&target)?, source_b);
        Ok(())
    }

    #[test]
    fn test_create_symlink_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let result = create_symlink(&dir.path().join("missing"), &dir.path().join("link"));
        assert!(result.is_err());
    }
}
