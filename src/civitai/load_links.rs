//! 链接回放节点
//!
//! 读取先前保存的 token/job_id 记录, 取回已完成任务的图片。
//! 每条记录只查询一次状态, 不做轮询

use std::{fs, path::Path};

use candle_core::{Device, Tensor};
use chrono::Local;
use log::{error, warn};
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyErr, PyResult, Python,
};
use serde_json::json;

use crate::{
    core::{
        category::CATEGORY_CIVITAI,
        utils::image::{decode_rgb_image, image_to_batch_tensor},
    },
    error::Error,
    wrapper::{
        comfy::folder_paths::FolderPaths,
        comfyui::{
            types::{NODE_BOOLEAN, NODE_IMAGE, NODE_STRING},
            PromptServer,
        },
        torch::tensor::TensorWrapper,
    },
};

use super::{
    client::CivitaiClient,
    links::{self, LinkEntry, LINKS_DIR},
    poll::JobStatusSource,
};

const NOT_SELECTED: &str = "Not selected";

/// 加载链接
#[pyclass(subclass)]
pub struct LoadCivitaiLinks {}

impl PromptServer for LoadCivitaiLinks {}

#[pymethods]
impl LoadCivitaiLinks {
    #[new]
    fn new() -> Self {
        Self {}
    }

    #[classmethod]
    #[pyo3(name = "INPUT_TYPES")]
    fn input_types(_cls: &Bound<'_, PyType>) -> PyResult<Py<PyDict>> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            dict.set_item("required", {
                let required = PyDict::new(py);
                required.set_item(
                    "api_token",
                    (NODE_STRING, {
                        let api_token = PyDict::new(py);
                        api_token.set_item("default", "")?;
                        api_token.set_item("placeholder", "CivitAI API token")?;
                        api_token
                    }),
                )?;
                required.set_item(
                    "links_file_path",
                    (NODE_STRING, {
                        let links_file_path = PyDict::new(py);
                        links_file_path.set_item("default", "")?;
                        links_file_path
                            .set_item("placeholder", "Path to links file (priority if not empty)")?;
                        links_file_path
                    }),
                )?;

                let mut choices = vec![NOT_SELECTED.to_string()];
                choices.extend(links::list_links_files(Path::new(LINKS_DIR)));
                required.set_item(
                    "selected_file",
                    (choices, {
                        let selected_file = PyDict::new(py);
                        selected_file.set_item("default", NOT_SELECTED)?;
                        selected_file
                    }),
                )?;
                required.set_item(
                    "direct_links",
                    (NODE_STRING, {
                        let direct_links = PyDict::new(py);
                        direct_links.set_item("multiline", true)?;
                        direct_links.set_item("default", "")?;
                        direct_links.set_item(
                            "placeholder",
                            "Enter links directly (e.g., Style;Model;URN;Link;Token: <token>;Job ID: <job_id>)",
                        )?;
                        direct_links
                    }),
                )?;
                required
            })?;
            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item(
                    "auto_save",
                    (NODE_BOOLEAN, {
                        let auto_save = PyDict::new(py);
                        auto_save.set_item("default", false)?;
                        auto_save.set_item("label_on", "Enable Auto-Save")?;
                        auto_save.set_item("label_off", "Disable Auto-Save")?;
                        auto_save
                    }),
                )?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str, &'static str, &'static str) {
        (NODE_IMAGE, NODE_STRING, NODE_STRING)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str, &'static str, &'static str) {
        ("images", "status_info", "LIST_style")
    }

    #[classattr]
    #[pyo3(name = "OUTPUT_IS_LIST")]
    fn output_is_list() -> (bool, bool, bool) {
        (false, false, true)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_CIVITAI;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Load finished Civitai generations from saved link files or pasted links."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "execute";

    /// 输入变化时强制重新执行
    #[classmethod]
    #[pyo3(name = "IS_CHANGED", signature = (**_kwargs))]
    fn is_changed(_cls: &Bound<'_, PyType>, _kwargs: Option<&Bound<'_, PyDict>>) -> f64 {
        f64::NAN
    }

    #[pyo3(
        name = "execute",
        signature = (api_token, links_file_path, selected_file, direct_links, auto_save=false)
    )]
    fn execute<'py>(
        &mut self,
        py: Python<'py>,
        api_token: &str,
        links_file_path: &str,
        selected_file: &str,
        direct_links: &str,
        auto_save: bool,
    ) -> PyResult<(Bound<'py, PyAny>, String, Vec<String>)> {
        let result = self.load_images(
            py,
            api_token,
            links_file_path,
            selected_file,
            direct_links,
            auto_save,
        );

        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("load civitai links failed, {e}");
                if let Err(e) = self.send_error(py, "CIVITAI_LINKS_ERROR".to_string(), e.to_string())
                {
                    error!("send error failed, {e}");
                }
                Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
            }
        }
    }
}

impl LoadCivitaiLinks {
    fn load_images<'py>(
        &self,
        py: Python<'py>,
        api_token: &str,
        links_file_path: &str,
        selected_file: &str,
        direct_links: &str,
        auto_save: bool,
    ) -> Result<(Bound<'py, PyAny>, String, Vec<String>), Error> {
        if api_token.trim().is_empty() {
            return Err(Error::MissingApiToken);
        }

        let content = read_links_source(links_file_path, selected_file, direct_links)?;
        let mut client = CivitaiClient::new(api_token)?;

        let mut batches: Vec<Tensor> = Vec::new();
        let mut list_styles: Vec<String> = Vec::new();
        let mut loaded = 0usize;
        let mut failed = 0usize;
        let mut attempted = 0usize;

        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            attempted += 1;
            match self.load_single(&mut client, line, auto_save) {
                Ok((batch, list_style)) => {
                    batches.push(batch);
                    list_styles.push(list_style);
                    loaded += 1;
                }
                Err(e) => {
                    warn!("error processing link {line:?}, {e}");
                    failed += 1;
                }
            }
        }

        if batches.is_empty() {
            return Err(Error::NoImagesLoaded);
        }

        let status_info = json!({
            "loaded": loaded,
            "failed": failed,
            "attempted": attempted,
            "timestamp": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });

        let combined = Tensor::cat(&batches, 0)?;
        let images = TensorWrapper::<f32>::from_tensor(combined).to_py_tensor(py)?;
        Ok((
            images,
            serde_json::to_string_pretty(&status_info)?,
            list_styles,
        ))
    }

    /// 处理单条记录: 查询一次状态, 结果可用则取图
    fn load_single(
        &self,
        client: &mut CivitaiClient,
        line: &str,
        auto_save: bool,
    ) -> Result<(Tensor, String), Error> {
        let entry = LinkEntry::parse(line)?;

        let status = client.job_status(&entry.token, &entry.job_id)?;
        let url = status
            .available_url()
            .ok_or_else(|| Error::InvalidApiResponse(format!(
                "job {} not yet available",
                entry.job_id
            )))?;

        let bytes = client.fetch_image(url)?;
        let image = decode_rgb_image(&bytes)?;

        let list_style = match &entry.style {
            Some(info) => {
                if auto_save {
                    self.auto_save_image(&image, &info.style, &entry.job_id)?;
                }
                format!(
                    "{};{};{};{}",
                    info.style, info.model_name, info.model_urn, info.model_url
                )
            }
            None => String::new(),
        };

        let batch = image_to_batch_tensor(&image, &Device::Cpu)?;
        Ok((batch, list_style))
    }

    /// 按风格落盘: output/civitai_autosave/<style>/<job_id>.png
    fn auto_save_image(
        &self,
        image: &image::DynamicImage,
        style: &str,
        job_id: &str,
    ) -> Result<(), Error> {
        let style_folder = style.replace(' ', "_");
        let save_dir = FolderPaths::default()
            .output_directory()
            .join("civitai_autosave")
            .join(style_folder);
        fs::create_dir_all(&save_dir)?;
        image.save(save_dir.join(format!("{job_id}.png")))?;
        Ok(())
    }
}

/// 按优先级确定链接来源: 显式路径 > 下拉选择 > 直接粘贴
fn read_links_source(
    links_file_path: &str,
    selected_file: &str,
    direct_links: &str,
) -> Result<String, Error> {
    let links_file_path = links_file_path.trim();
    if !links_file_path.is_empty() {
        let path = Path::new(links_file_path);
        if !path.exists() {
            return Err(Error::FileNotFound(links_file_path.to_string()));
        }
        return Ok(fs::read_to_string(path)?);
    }

    let selected_file = selected_file.trim();
    if !selected_file.is_empty() && selected_file != NOT_SELECTED {
        let path = Path::new(LINKS_DIR).join(selected_file);
        if !path.exists() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }
        return Ok(fs::read_to_string(path)?);
    }

    if !direct_links.trim().is_empty() {
        return Ok(direct_links.to_string());
    }

    Err(Error::NoLinksSource)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_links_source_priority() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("links.txt");
        std::fs::write(&file, "Token: a;Job ID: 1\n")?;

        // 显式路径优先于直接粘贴
        let content = read_links_source(
            file.to_str().unwrap(),
            NOT_SELECTED,
            "Token: b;Job ID: 2",
        )?;
        assert_eq!(content, "Token: a;Job ID: 1\n");

        // 路径为空时回退到直接粘贴
        let content = read_links_source("", NOT_SELECTED, "Token: b;Job ID: 2")?;
        assert_eq!(content, "Token: b;Job ID: 2");
        Ok(())
    }

    #[test]
    fn test_read_links_source_errors() {
        assert!(matches!(
            read_links_source("", NOT_SELECTED, ""),
            Err(Error::NoLinksSource)
        ));
        assert!(matches!(
            read_links_source("/nonexistent/links.txt", NOT_SELECTED, ""),
            Err(Error::FileNotFound(_))
        ));
    }
}
