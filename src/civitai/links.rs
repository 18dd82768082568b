//! 生成链接落盘与回放
//!
//! 行格式 (分号分隔):
//! - 两字段: `Token: <token>;Job ID: <job_id>`
//! - 六字段: `<style>;<model_name>;<model_urn>;<model_url>;Token: <token>;Job ID: <job_id>`

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Local;
use log::warn;

use crate::error::Error;

/// 链接文件目录, 相对宿主工作目录
pub const LINKS_DIR: &str = "Bjornulf/civitai_links";

const TOKEN_PREFIX: &str = "Token: ";
const JOB_ID_PREFIX: &str = "Job ID: ";

/// 风格选择器透传的模型信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleInfo {
    pub style: String,
    pub model_name: String,
    pub model_urn: String,
    pub model_url: String,
}

/// 一条已提交任务的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub style: Option<StyleInfo>,
    pub token: String,
    pub job_id: String,
}

impl LinkEntry {
    /// 解析一行链接记录
    pub fn parse(line: &str) -> Result<Self, Error> {
        let line = line.trim();
        let parts: Vec<&str> = line.split(';').collect();

        let (style, token_part, job_id_part) = match parts.as_slice() {
            [token, job_id] => (None, *token, *job_id),
            [style, model_name, model_urn, model_url, token, job_id] => {
                let style = StyleInfo {
                    style: style.trim().to_string(),
                    model_name: model_name.trim().to_string(),
                    model_urn: model_urn.trim().to_string(),
                    model_url: model_url.trim().to_string(),
                };
                (Some(style), *token, *job_id)
            }
            _ => return Err(Error::InvalidLinkFormat(line.to_string())),
        };

        let token = strip_labeled(token_part, TOKEN_PREFIX)
            .ok_or_else(|| Error::InvalidLinkFormat(line.to_string()))?;
        let job_id = strip_labeled(job_id_part, JOB_ID_PREFIX)
            .ok_or_else(|| Error::InvalidLinkFormat(line.to_string()))?;

        Ok(Self {
            style,
            token,
            job_id,
        })
    }

    /// 序列化为单行记录, parse 的逆
    pub fn to_line(&self) -> String {
        match &self.style {
            Some(info) => format!(
                "{};{};{};{};{TOKEN_PREFIX}{};{JOB_ID_PREFIX}{}",
                info.style, info.model_name, info.model_urn, info.model_url, self.token, self.job_id
            ),
            None => format!(
                "{TOKEN_PREFIX}{};{JOB_ID_PREFIX}{}",
                self.token, self.job_id
            ),
        }
    }
}

fn strip_labeled(part: &str, prefix: &str) -> Option<String> {
    let trimmed = part.trim();
    let value = trimmed.strip_prefix(prefix)?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

/// 解析风格选择器输出的前四段 `style;model;urn;url`
pub fn parse_style_list(list: &str) -> Option<StyleInfo> {
    let parts: Vec<&str> = list.trim().split(';').collect();
    if parts.len() < 4 {
        return None;
    }
    Some(StyleInfo {
        style: parts[0].trim().to_string(),
        model_name: parts[1].trim().to_string(),
        model_urn: parts[2].trim().to_string(),
        model_url: parts[3].trim().to_string(),
    })
}

/// 当天的下一个链接文件名, 形如 `24_august_2026_003.txt`
pub fn next_links_filename(links_dir: &Path) -> String {
    let day = Local::now().format("%d_%B_%Y").to_string().to_lowercase();

    let max_index = list_links_files(links_dir)
        .into_iter()
        .filter_map(|name| {
            let stem = name.strip_suffix(".txt")?;
            let index = stem.strip_prefix(&format!("{day}_"))?;
            index.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0);

    format!("{day}_{:03}.txt", max_index + 1)
}

/// 目录下全部链接文件名, 按名称排序
pub fn list_links_files(links_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(links_dir) else {
        return Vec::new();
    };

    let mut files: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".txt"))
        .collect();
    files.sort();
    files
}

/// 追加任务记录到链接文件, 返回写入的文件路径
///
/// `links_file` 为空时自动使用当天的下一个编号文件
pub fn append_entries(
    links_dir: &Path,
    links_file: &str,
    entries: &[LinkEntry],
) -> Result<PathBuf, Error> {
    fs::create_dir_all(links_dir)?;

    let mut filename = if links_file.trim().is_empty() {
        next_links_filename(links_dir)
    } else {
        links_file.trim().to_string()
    };
    if !filename.ends_with(".txt") {
        filename.push_str(".txt");
    }
    let path = links_dir.join(filename);

    let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    for entry in entries {
        writeln!(file, "{}", entry.to_line())?;
    }

    Ok(path)
}

/// 读取链接文件的全部可解析记录, 无法解析的行记录告警后跳过
pub fn read_entries(path: &Path) -> Result<Vec<LinkEntry>, Error> {
    let content = fs::read_to_string(path)?;
    Ok(parse_lines(&content))
}

/// 解析多行文本中的记录, 跳过空行与坏行
pub fn parse_lines(content: &str) -> Vec<LinkEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match LinkEntry::parse(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("skipping malformed link line, {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_field_line() -> anyhow::Result<()> {
        let entry = LinkEntry::parse("Token: abc123;Job ID: j-42")?;
        assert_eq!(entry.token, "abc123");
        assert_eq!(entry.job_id, "j-42");
        assert!(entry.style.is_none());
        assert_eq!(entry.to_line(), "Token: abc123;Job ID: j-42");
        Ok(())
    }

    #[test]
    fn test_parse_six_field_line_trims_whitespace() -> anyhow::Result<()> {
        let entry = LinkEntry::parse(
            " anime ; Meina ; urn:air:sd1:checkpoint:civitai:7240@119057 ; https://civitai.com/models/7240 ; Token: tok ; Job ID: j-7 \n",
        )?;
        let style = entry.style.as_ref().unwrap();
        assert_eq!(style.style, "anime");
        assert_eq!(style.model_name, "Meina");
        assert_eq!(style.model_urn, "urn:air:sd1:checkpoint:civitai:7240@119057");
        assert_eq!(entry.token, "tok");
        assert_eq!(entry.job_id, "j-7");
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        for line in [
            "",
            "just some text",
            "Token: abc",
            "Token: ;Job ID: j-1",
            "Token: abc;job: j-1",
            "a;b;c;Token: t;Job ID: j",
        ] {
            assert!(LinkEntry::parse(line).is_err(), "accepted: {line:?}");
        }
    }

    #[test]
    fn test_parse_lines_skips_bad_lines() {
        let content = "Token: a;Job ID: 1\n\ngarbage\nToken: b;Job ID: 2\n";
        let entries = parse_lines(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].job_id, "2");
    }

    #[test]
    fn test_parse_style_list() {
        let info = parse_style_list("anime;Meina;urn:x;https://example.com").unwrap();
        assert_eq!(info.model_urn, "urn:x");
        assert!(parse_style_list("anime;Meina").is_none());
    }

    #[test]
    fn test_next_links_filename_increments() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let day = Local::now().format("%d_%B_%Y").to_string().to_lowercase();

        assert_eq!(next_links_filename(dir.path()), format!("{day}_001.txt"));

        fs::write(dir.path().join(format!("{day}_001.txt")), "")?;
        fs::write(dir.path().join(format!("{day}_005.txt")), "")?;
        // 其他日期与非 txt 文件不参与编号
        fs::write(dir.path().join("01_january_2020_099.txt"), "")?;
        fs::write(dir.path().join(format!("{day}_777.log")), "")?;

        assert_eq!(next_links_filename(dir.path()), format!("{day}_006.txt"));
        Ok(())
    }

    #[test]
    fn test_append_and_read_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let entries = vec![
            LinkEntry {
                style: None,
                token: "t1".to_string(),
                job_id: "j1".to_string(),
            },
            LinkEntry {
                style: Some(StyleInfo {
                    style: "realistic".to_string(),
                    model_name: "Juggernaut".to_string(),
                    model_urn: "urn:air:sdxl:checkpoint:civitai:133005@348913".to_string(),
                    model_url: "https://civitai.com/models/133005".to_string(),
                }),
                token: "t2".to_string(),
                job_id: "j2".to_string(),
            },
        ];

        let path = append_entries(dir.path(), "", &entries)?;
        let loaded = read_entries(&path)?;
        assert_eq!(loaded, entries);

        // 追加写入同一文件
        append_entries(dir.path(), path.file_name().unwrap().to_str().unwrap(), &entries[..1])?;
        assert_eq!(read_entries(&path)?.len(), 3);
        Ok(())
    }
}
