//! CivitAI 在线生成节点
//!
//! 提交 textToImage 任务后两种模式:
//! - 立即等待: 轮询任务直到全部结束, 输出合并后的图片批次
//! - 仅存链接: 把 token/job_id 写入链接文件, 稍后由加载节点取回

use std::{path::Path, time::Duration};

use candle_core::{Device, Tensor};
use chrono::Local;
use lazy_static::lazy_static;
use log::{error, warn};
use regex::Regex;
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyErr, PyResult, Python,
};
use rand::Rng;
use serde_json::json;

use crate::{
    core::{
        category::CATEGORY_CIVITAI,
        utils::image::{decode_rgb_image, empty_image_tensor, image_to_batch_tensor},
    },
    error::Error,
    utils::pause_gate::WORKFLOW_GATE,
    wrapper::{
        comfyui::{
            types::{
                NODE_BOOLEAN, NODE_FLOAT, NODE_IMAGE, NODE_INT, NODE_SEED_MAX, NODE_STRING,
            },
            PromptServer,
        },
        torch::tensor::TensorWrapper,
    },
};

use super::{
    client::{CivitaiClient, GenerationInput, GenerationJob, GenerationParams},
    links::{self, parse_style_list, LinkEntry, LINKS_DIR},
    poll::JobPoller,
};

/// 在线生成
#[pyclass(subclass)]
pub struct ApiGenerateCivitai {}

impl PromptServer for ApiGenerateCivitai {}

#[pymethods]
impl ApiGenerateCivitai {
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
                    "prompt",
                    (NODE_STRING, {
                        let prompt = PyDict::new(py);
                        prompt.set_item("multiline", true)?;
                        prompt.set_item("default", "RAW photo, face portrait photo of 26 y.o woman")?;
                        prompt
                    }),
                )?;
                required.set_item(
                    "negative_prompt",
                    (NODE_STRING, {
                        let negative_prompt = PyDict::new(py);
                        negative_prompt.set_item("multiline", true)?;
                        negative_prompt.set_item(
                            "default",
                            "low quality, blurry, pixelated, distorted, artifacts",
                        )?;
                        negative_prompt
                    }),
                )?;
                required.set_item(
                    "width",
                    (NODE_INT, {
                        let width = PyDict::new(py);
                        width.set_item("default", 1024)?;
                        width.set_item("min", 128)?;
                        width.set_item("max", 1024)?;
                        width.set_item("step", 64)?;
                        width
                    }),
                )?;
                required.set_item(
                    "height",
                    (NODE_INT, {
                        let height = PyDict::new(py);
                        height.set_item("default", 768)?;
                        height.set_item("min", 128)?;
                        height.set_item("max", 1024)?;
                        height.set_item("step", 64)?;
                        height
                    }),
                )?;
                required.set_item(
                    "steps",
                    (NODE_INT, {
                        let steps = PyDict::new(py);
                        steps.set_item("default", 20)?;
                        steps.set_item("min", 1)?;
                        steps.set_item("max", 50)?;
                        steps.set_item("step", 1)?;
                        steps
                    }),
                )?;
                required.set_item(
                    "cfg_scale",
                    (NODE_FLOAT, {
                        let cfg_scale = PyDict::new(py);
                        cfg_scale.set_item("default", 7.0)?;
                        cfg_scale.set_item("min", 1.0)?;
                        cfg_scale.set_item("max", 30.0)?;
                        cfg_scale.set_item("step", 0.1)?;
                        cfg_scale
                    }),
                )?;
                required.set_item(
                    "seed",
                    (NODE_INT, {
                        let seed = PyDict::new(py);
                        seed.set_item("default", -1)?;
                        seed.set_item("min", -1)?;
                        seed.set_item("max", NODE_SEED_MAX)?;
                        seed
                    }),
                )?;
                required.set_item(
                    "number_of_images",
                    (NODE_INT, {
                        let number_of_images = PyDict::new(py);
                        number_of_images.set_item("default", 1)?;
                        number_of_images.set_item("min", 1)?;
                        number_of_images.set_item("max", 10)?;
                        number_of_images.set_item("step", 1)?;
                        number_of_images
                    }),
                )?;
                required.set_item(
                    "timeout",
                    (NODE_INT, {
                        let timeout = PyDict::new(py);
                        timeout.set_item("default", 300)?;
                        timeout.set_item("min", 60)?;
                        timeout.set_item("max", 1800)?;
                        timeout.set_item("step", 60)?;
                        timeout
                    }),
                )?;
                required
            })?;
            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item(
                    "model_urn",
                    (NODE_STRING, {
                        let model_urn = PyDict::new(py);
                        // SDXL default
                        model_urn
                            .set_item("default", "urn:air:sdxl:checkpoint:civitai:101055@128078")?;
                        model_urn
                    }),
                )?;
                optional.set_item(
                    "add_LORA",
                    (NODE_STRING, {
                        let add_lora = PyDict::new(py);
                        add_lora.set_item("multiline", true)?;
                        add_lora.set_item("default", "")?;
                        add_lora
                    }),
                )?;
                optional.set_item(
                    "DO_NOT_WAIT",
                    (NODE_BOOLEAN, {
                        let do_not_wait = PyDict::new(py);
                        do_not_wait.set_item("default", false)?;
                        do_not_wait.set_item("label_on", "Save Links Only")?;
                        do_not_wait.set_item("label_off", "Generate Now")?;
                        do_not_wait
                    }),
                )?;
                optional.set_item(
                    "links_file",
                    (NODE_STRING, {
                        let links_file = PyDict::new(py);
                        links_file.set_item("default", "")?;
                        links_file.set_item("multiline", false)?;
                        links_file
                    }),
                )?;
                optional.set_item(
                    "LIST_from_style_selector",
                    (NODE_STRING, {
                        let list = PyDict::new(py);
                        list.set_item("default", "")?;
                        list.set_item("multiline", true)?;
                        list.set_item(
                            "placeholder",
                            "e.g., Low Poly ;Samaritan 3D Cartoon;urn:air:sdxl:checkpoint:civitai:81270@144566;https://civitai.green/models/81270?modelVersionId=144566",
                        )?;
                        list
                    }),
                )?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str, &'static str) {
        (NODE_IMAGE, NODE_STRING)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str, &'static str) {
        ("images", "generation_info")
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_CIVITAI;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Generate images through the CivitAI orchestration API. \
        Enable DO_NOT_WAIT to only record job links for later loading."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "execute";

    #[pyo3(
        name = "execute",
        signature = (api_token, prompt, negative_prompt, width, height, steps, cfg_scale, seed, number_of_images, timeout, model_urn=None, add_LORA=None, DO_NOT_WAIT=false, links_file=None, LIST_from_style_selector=None)
    )]
    #[allow(non_snake_case, clippy::too_many_arguments)]
    fn execute<'py>(
        &mut self,
        py: Python<'py>,
        api_token: &str,
        prompt: &str,
        negative_prompt: &str,
        width: u32,
        height: u32,
        steps: u32,
        cfg_scale: f64,
        seed: i64,
        number_of_images: u32,
        timeout: u64,
        model_urn: Option<&str>,
        add_LORA: Option<&str>,
        DO_NOT_WAIT: bool,
        links_file: Option<&str>,
        LIST_from_style_selector: Option<&str>,
    ) -> PyResult<(Bound<'py, PyAny>, String)> {
        let request = GenerateRequest {
            api_token,
            prompt,
            negative_prompt,
            width,
            height,
            steps,
            cfg_scale,
            seed,
            number_of_images,
            timeout: Duration::from_secs(timeout),
            model_urn: model_urn.unwrap_or(""),
            add_lora: add_LORA.unwrap_or(""),
            do_not_wait: DO_NOT_WAIT,
            links_file: links_file.unwrap_or(""),
            style_list: LIST_from_style_selector.unwrap_or(""),
        };

        match self.generate(py, &request) {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("civitai generation failed, {e}");
                if let Err(e) = self.send_error(py, "CIVITAI_GENERATE_ERROR".to_string(), e.to_string())
                {
                    error!("send error failed, {e}");
                }
                Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
            }
        }
    }
}

struct GenerateRequest<'a> {
    api_token: &'a str,
    prompt: &'a str,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    cfg_scale: f64,
    seed: i64,
    number_of_images: u32,
    timeout: Duration,
    model_urn: &'a str,
    add_lora: &'a str,
    do_not_wait: bool,
    links_file: &'a str,
    style_list: &'a str,
}

impl ApiGenerateCivitai {
    fn generate<'py>(
        &self,
        py: Python<'py>,
        request: &GenerateRequest<'_>,
    ) -> Result<(Bound<'py, PyAny>, String), Error> {
        if request.api_token.trim().is_empty() {
            return Err(Error::MissingApiToken);
        }

        let model_urn = resolve_model_urn(request.model_urn, request.style_list)?;
        let seed = match request.seed {
            -1 => rand::rng().random_range(0..NODE_SEED_MAX),
            s => s,
        };
        let inputs = build_inputs(
            &model_urn,
            request.prompt,
            request.negative_prompt,
            request.width,
            request.height,
            request.steps,
            request.cfg_scale,
            seed,
            request.number_of_images,
            request.add_lora,
        );

        let client = CivitaiClient::new(request.api_token)?;
        let mut jobs: Vec<GenerationJob> = Vec::with_capacity(inputs.len());
        for input in &inputs {
            jobs.push(client.submit(input)?);
        }

        if request.do_not_wait {
            let info = self.save_links(request, &jobs)?;
            let empty = empty_image_tensor(&Device::Cpu)?;
            let images = TensorWrapper::<f32>::from_tensor(empty).to_py_tensor(py)?;
            return Ok((images, info));
        }

        self.wait_for_images(py, &client, request, &jobs)
    }

    /// 仅保存链接: 追加 token/job_id 到链接文件
    fn save_links(
        &self,
        request: &GenerateRequest<'_>,
        jobs: &[GenerationJob],
    ) -> Result<String, Error> {
        let style = parse_style_list(request.style_list);
        let entries: Vec<LinkEntry> = jobs
            .iter()
            .map(|job| LinkEntry {
                style: style.clone(),
                token: job.token.clone(),
                job_id: job.job_id.clone(),
            })
            .collect();

        let path = links::append_entries(Path::new(LINKS_DIR), request.links_file, &entries)?;

        let info = json!({
            "status": "links_saved",
            "links_file": path.display().to_string(),
            "timestamp": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "number_of_jobs": jobs.len(),
        });
        Ok(serde_json::to_string_pretty(&info)?)
    }

    /// 轮询全部任务并拼接图片批次, 部分失败不中断
    fn wait_for_images<'py>(
        &self,
        py: Python<'py>,
        client: &CivitaiClient,
        request: &GenerateRequest<'_>,
        jobs: &[GenerationJob],
    ) -> Result<(Bound<'py, PyAny>, String), Error> {
        let mut poller = JobPoller::new(CivitaiClient::new(request.api_token)?);
        let mut batches: Vec<Tensor> = Vec::new();
        let mut infos: Vec<serde_json::Value> = Vec::new();
        let mut failed_jobs: Vec<serde_json::Value> = Vec::new();

        for job in jobs {
            let result = poller
                .wait_for_result(&job.token, &job.job_id, request.timeout, &*WORKFLOW_GATE)
                .and_then(|url| {
                    let bytes = client.fetch_image(&url)?;
                    let image = decode_rgb_image(&bytes)?;
                    let batch = image_to_batch_tensor(&image, &Device::Cpu)?;
                    Ok((url, batch))
                });

            match result {
                Ok((url, batch)) => {
                    batches.push(batch);
                    infos.push(json!({
                        "token": job.token,
                        "job_id": job.job_id,
                        "image_url": url,
                    }));
                }
                // 用户中断立即向上传播, 不再等待剩余任务
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) => {
                    warn!("job {} failed, {e}", job.job_id);
                    failed_jobs.push(json!({
                        "token": job.token,
                        "job_id": job.job_id,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        if batches.is_empty() {
            let info = json!({"error": "All jobs failed", "failed_jobs": failed_jobs});
            let empty = empty_image_tensor(&Device::Cpu)?;
            let images = TensorWrapper::<f32>::from_tensor(empty).to_py_tensor(py)?;
            return Ok((images, serde_json::to_string_pretty(&info)?));
        }

        let combined = Tensor::cat(&batches, 0)?;
        let info = json!({
            "successful_generations": batches.len(),
            "total_requested": request.number_of_images,
            "individual_results": infos,
            "failed_jobs": if failed_jobs.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::Array(failed_jobs)
            },
        });

        let images = TensorWrapper::<f32>::from_tensor(combined).to_py_tensor(py)?;
        Ok((images, serde_json::to_string_pretty(&info)?))
    }
}

lazy_static! {
    /// AIR 模型引用: urn:air:<ecosystem>:<type>:civitai:<id>@<version>
    static ref MODEL_URN_RE: Regex =
        Regex::new(r"^urn:air:[a-z0-9._-]+:[a-z]+:civitai:\d+@\d+$").unwrap();
}

/// 模型 urn 为空时从风格选择器列表的第三段取值
fn resolve_model_urn(model_urn: &str, style_list: &str) -> Result<String, Error> {
    let model_urn = model_urn.trim();
    if !model_urn.is_empty() {
        return validate_model_urn(model_urn);
    }

    let style_list = style_list.trim();
    if !style_list.is_empty() {
        let parts: Vec<&str> = style_list.split(';').collect();
        if parts.len() >= 3 {
            let urn = parts[2].trim();
            if !urn.is_empty() {
                return validate_model_urn(urn);
            }
        }
        return Err(Error::InvalidModelUrn(style_list.to_string()));
    }

    Err(Error::MissingModelUrn)
}

fn validate_model_urn(urn: &str) -> Result<String, Error> {
    if !MODEL_URN_RE.is_match(urn) {
        return Err(Error::InvalidModelUrn(urn.to_string()));
    }
    Ok(urn.to_string())
}

/// 为 N 张图构建任务输入, 种子逐一递增
#[allow(clippy::too_many_arguments)]
fn build_inputs(
    model_urn: &str,
    prompt: &str,
    negative_prompt: &str,
    width: u32,
    height: u32,
    steps: u32,
    cfg_scale: f64,
    seed: i64,
    number_of_images: u32,
    add_lora: &str,
) -> Vec<GenerationInput> {
    let additional_networks = parse_additional_networks(add_lora);

    (0..number_of_images as i64)
        .map(|i| GenerationInput {
            model: model_urn.to_string(),
            params: GenerationParams {
                prompt: prompt.to_string(),
                negative_prompt: negative_prompt.to_string(),
                scheduler: "EulerA".to_string(),
                steps,
                cfg_scale,
                width,
                height,
                clip_skip: 2,
                seed: seed.saturating_add(i),
            },
            additional_networks: additional_networks.clone(),
        })
        .collect()
}

/// 解析 add_LORA JSON, 坏数据仅告警不中断
fn parse_additional_networks(
    add_lora: &str,
) -> Option<std::collections::BTreeMap<String, super::client::LoraNetwork>> {
    if add_lora.trim().is_empty() {
        return None;
    }

    let parsed: Result<serde_json::Value, _> = serde_json::from_str(add_lora);
    match parsed {
        Ok(value) => match value.get("additionalNetworks") {
            Some(networks) => match serde_json::from_value(networks.clone()) {
                Ok(networks) => Some(networks),
                Err(e) => {
                    warn!("invalid additionalNetworks payload, {e}");
                    None
                }
            },
            None => None,
        },
        Err(e) => {
            warn!("error processing LORA data, {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_urn_prefers_explicit() -> anyhow::Result<()> {
        let urn = resolve_model_urn("urn:air:sd1:checkpoint:civitai:1@2", "a;b;urn:other;url")?;
        assert_eq!(urn, "urn:air:sd1:checkpoint:civitai:1@2");
        Ok(())
    }

    #[test]
    fn test_resolve_model_urn_from_style_list() -> anyhow::Result<()> {
        let urn = resolve_model_urn(
            "",
            "Low Poly ;Samaritan 3D Cartoon; urn:air:sdxl:checkpoint:civitai:81270@144566 ;https://civitai.green/models/81270",
        )?;
        assert_eq!(urn, "urn:air:sdxl:checkpoint:civitai:81270@144566");
        Ok(())
    }

    #[test]
    fn test_resolve_model_urn_errors() {
        assert!(matches!(
            resolve_model_urn("", ""),
            Err(Error::MissingModelUrn)
        ));
        assert!(matches!(
            resolve_model_urn("", "style;model"),
            Err(Error::InvalidModelUrn(_))
        ));
        assert!(matches!(
            resolve_model_urn("not-a-urn", ""),
            Err(Error::InvalidModelUrn(_))
        ));
    }

    #[test]
    fn test_build_inputs_increments_seed() {
        let inputs = build_inputs("urn:m", "p", "n", 512, 512, 20, 7.0, 100, 3, "");
        assert_eq!(inputs.len(), 3);
        let seeds: Vec<i64> = inputs.iter().map(|i| i.params.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102]);
        assert!(inputs.iter().all(|i| i.params.scheduler == "EulerA"));
        assert!(inputs.iter().all(|i| i.params.clip_skip == 2));
        assert!(inputs.iter().all(|i| i.additional_networks.is_none()));
    }

    #[test]
    fn test_build_inputs_carries_loras() {
        let add_lora = r#"{"additionalNetworks":{"urn:a":{"type":"Lora","strength":0.6}}}"#;
        let inputs = build_inputs("urn:m", "p", "n", 512, 512, 20, 7.0, 1, 2, add_lora);
        for input in &inputs {
            let networks = input.additional_networks.as_ref().unwrap();
            assert_eq!(networks["urn:a"].strength, 0.6);
        }
    }

    #[test]
    fn test_parse_additional_networks_tolerates_garbage() {
        assert!(parse_additional_networks("").is_none());
        assert!(parse_additional_networks("not json").is_none());
        assert!(parse_additional_networks("{}").is_none());
    }
}
