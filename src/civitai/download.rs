//! 模型权重下载
//!
//! 流式写盘, 8192 字节分块, 终端输出定宽进度条

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use log::info;
use reqwest::blocking::Client;

use crate::error::Error;

const CHUNK_SIZE: usize = 8192;
const BAR_WIDTH: usize = 20;

/// 在下载地址上追加访问 token
pub fn with_token_param(url: &str, token: &str) -> String {
    if token.is_empty() {
        return url.to_string();
    }
    if url.contains('?') {
        format!("{url}&token={token}")
    } else {
        format!("{url}?token={token}")
    }
}

/// 下载权重文件到 `destination_dir/{model_name}.safetensors`, 返回落盘路径
pub fn download_file(
    url: &str,
    destination_dir: &Path,
    model_name: &str,
    api_token: &str,
) -> Result<PathBuf, Error> {
    fs::create_dir_all(destination_dir)?;
    let file_path = destination_dir.join(format!("{model_name}.safetensors"));

    // 大文件下载不设总超时, 仅限制建连
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(None)
        .build()?;
    let mut request = client.get(url);
    if !api_token.is_empty() {
        request = request.bearer_auth(api_token);
    }

    let mut response = request.send()?;
    if !response.status().is_success() {
        return Err(Error::Download(format!(
            "{model_name} download failed with status {}",
            response.status()
        )));
    }

    let file_size = response.content_length().unwrap_or(0);
    let mut file = fs::File::create(&file_path)?;
    let mut downloaded: u64 = 0;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let n = response.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n])?;

        if file_size > 0 {
            downloaded += n as u64;
            print_progress(downloaded, file_size);
        }
    }
    if file_size > 0 {
        println!();
    }

    Ok(file_path)
}

fn print_progress(downloaded: u64, total: u64) {
    let progress = ((downloaded * 100) / total).min(100) as usize;
    let num_hashes = progress * BAR_WIDTH / 100;
    print!(
        "\r[{}{}] {progress:3}%",
        "#".repeat(num_hashes),
        " ".repeat(BAR_WIDTH - num_hashes)
    );
    let _ = std::io::stdout().flush();
}

/// 确保权重已就绪, 已存在时跳过下载
pub fn ensure_downloaded(
    download_url: &str,
    destination_dir: &Path,
    model_name: &str,
    api_token: &str,
) -> Result<PathBuf, Error> {
    let file_path = destination_dir.join(format!("{model_name}.safetensors"));
    if file_path.exists() {
        return Ok(file_path);
    }

    info!("downloading model {model_name}...");
    let url = with_token_param(download_url, api_token);
    download_file(&url, destination_dir, model_name, api_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_token_param() {
        assert_eq!(
            with_token_param("https://a.example/dl", "tok"),
            "https://a.example/dl?token=tok"
        );
        // 已带查询串时追加 &token=, 原有参数保持不变
        assert_eq!(
            with_token_param("https://a.example/dl?type=Model", "tok"),
            "https://a.example/dl?type=Model&token=tok"
        );
        assert_eq!(with_token_param("https://a.example/dl", ""), "https://a.example/dl");
    }

    #[test]
    fn test_ensure_downloaded_skips_existing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let existing = dir.path().join("MeinaMix.safetensors");
        std::fs::write(&existing, b"weights")?;

        // 已存在时不发起网络请求, 无效地址也应成功返回
        let path = ensure_downloaded("http://127.0.0.1:1/none", dir.path(), "MeinaMix", "tok")?;
        assert_eq!(path, existing);
        assert_eq!(std::fs::read(&path)?, b"weights");
        Ok(())
    }

    #[test]
    fn test_download_file_reports_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = download_file("http://127.0.0.1:1/none", dir.path(), "Broken", "");
        assert!(result.is_err());
    }
}
