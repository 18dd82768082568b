//! 解析后的模型/LoRA 清单
//!
//! 清单由打包脚本预生成, 每个模型家族一个 JSON 文件,
//! 条目通过缩略图文件名与 UI 选择关联

use std::path::Path;

use chardet::{charset2encoding, detect};
use encoding::{label::encoding_from_whatwg_label, DecoderTrap};
use log::error;
use serde::Deserialize;

use crate::error::Error;

/// 清单条目
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub name: String,
    pub download_url: String,
    pub image_path: String,
    /// civitai 模型页 id, LoRA 清单中字段名为 lora_id
    #[serde(alias = "lora_id")]
    pub model_id: u64,
    #[serde(default)]
    pub trained_words: Vec<String>,
}

impl ManifestEntry {
    /// civitai 模型页地址
    pub fn civitai_url(&self) -> String {
        format!("https://civitai.com/models/{}", self.model_id)
    }

    /// 逗号连接的触发词
    pub fn trained_words_joined(&self) -> String {
        self.trained_words.join(", ")
    }
}

/// 加载清单文件
///
/// 非 UTF-8 清单按检测出的编码解码 (历史清单存在 latin-1 字符)
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, Error> {
    let content = read_with_auto_encoding(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// 按缩略图文件名查找条目, 匹配 basename
pub fn find_by_image<'a>(
    entries: &'a [ManifestEntry],
    image: &str,
) -> Result<&'a ManifestEntry, Error> {
    let image_name = Path::new(image)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(image);

    entries
        .iter()
        .find(|entry| {
            Path::new(&entry.image_path)
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name == image_name)
        })
        .ok_or_else(|| Error::ManifestEntryNotFound(image_name.to_string()))
}

/// 读取文件内容, 自动匹配文件编码
fn read_with_auto_encoding(path: &Path) -> Result<String, Error> {
    let bytes = std::fs::read(path)?;

    // 优先尝试 UTF-8 解码
    if let Ok(s) = std::str::from_utf8(&bytes) {
        return Ok(s.to_string());
    }

    let detected = detect(&bytes);
    if let Some(coder) = encoding_from_whatwg_label(charset2encoding(&detected.0)) {
        let decoded = coder.decode(&bytes, DecoderTrap::Ignore).map_err(|e| {
            error!("manifest decode error, {e}");
            Error::Decode(e.to_string())
        })?;
        return Ok(decoded);
    }

    error!("manifest auto decode failed, {}", path.display());
    Err(Error::Decode("manifest decode failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"[
        {
            "name": "MeinaMix",
            "download_url": "https://civitai.com/api/download/models/119057",
            "image_path": "civitai/sd_1.5/meinamix.jpeg",
            "model_id": 7240
        },
        {
            "name": "DetailTweaker",
            "download_url": "https://civitai.com/api/download/models/62833",
            "image_path": "civitai/lora_sd_1.5/detail.png",
            "lora_id": 58390,
            "trained_words": ["add_detail", "more details"]
        }
    ]"#;

    #[test]
    fn test_load_manifest_and_lookup() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("parsed_sd_1.5_models.json");
        std::fs::write(&path, MANIFEST)?;

        let entries = load_manifest(&path)?;
        assert_eq!(entries.len(), 2);

        // basename 匹配, 忽略调用方传入的目录前缀
        let entry = find_by_image(&entries, "sd_1.5/meinamix.jpeg")?;
        assert_eq!(entry.name, "MeinaMix");
        assert_eq!(entry.civitai_url(), "https://civitai.com/models/7240");
        assert!(entry.trained_words.is_empty());

        let lora = find_by_image(&entries, "detail.png")?;
        assert_eq!(lora.model_id, 58390);
        assert_eq!(lora.trained_words_joined(), "add_detail, more details");

        assert!(matches!(
            find_by_image(&entries, "missing.png"),
            Err(Error::ManifestEntryNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_load_manifest_latin1_fallback() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("parsed_pony_models.json");
        // 0xE9 = 'é' in latin-1, 非法 UTF-8
        let raw = MANIFEST.replace("MeinaMix", "Mein\u{e9}");
        let bytes: Vec<u8> = raw
            .chars()
            .map(|c| if c == '\u{e9}' { 0xE9 } else { c as u8 })
            .collect();
        std::fs::write(&path, bytes)?;

        let entries = load_manifest(&path)?;
        assert_eq!(entries[0].name, "Mein\u{e9}");
        Ok(())
    }
}
