//! CivitAI orchestration API 客户端
//!
//! 提交 textToImage 任务、按 token 查询任务状态、拉取生成结果图片

use std::{collections::BTreeMap, time::Duration};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::poll::JobStatusSource;

/// 任务编排服务地址
pub const ORCHESTRATION_ENDPOINT: &str = "https://orchestration.civitai.com/v2/consumer/jobs";

/// 未提供 token 时使用的公共回退 token
pub const DEFAULT_API_TOKEN: &str = "d5fc336223a367e6b503a14a10569825";

/// token 环境变量
pub const API_TOKEN_ENV: &str = "CIVITAI_API_TOKEN";

/// 解析生效的 API token: 输入 > 环境变量 > 公共回退
pub fn resolve_api_token(input: &str) -> String {
    resolve_api_token_from(input, std::env::var(API_TOKEN_ENV).ok())
}

fn resolve_api_token_from(input: &str, env_token: Option<String>) -> String {
    let trimmed = input.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    match env_token {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => DEFAULT_API_TOKEN.to_string(),
    }
}

/// textToImage 任务输入
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    pub model: String,
    pub params: GenerationParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_networks: Option<BTreeMap<String, LoraNetwork>>,
}

/// 生成参数, 字段名与服务端 camelCase 协议一致
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub scheduler: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    pub clip_skip: u32,
    pub seed: i64,
}

/// 附加 LoRA 网络
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoraNetwork {
    pub r#type: String,
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobRequest<'a> {
    #[serde(rename = "$type")]
    job_type: &'static str,
    input: &'a GenerationInput,
}

/// 提交响应: 轮询 token 与任务列表
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub token: String,
    #[serde(default)]
    pub jobs: Vec<SubmittedJob>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedJob {
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    #[serde(default)]
    pub jobs: Vec<JobStatus>,
}

/// 单个任务的状态快照
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<JobResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub blob_url: Option<String>,
}

impl JobStatus {
    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case("failed")
    }

    /// 结果可用时返回图片地址
    pub fn available_url(&self) -> Option<&str> {
        self.result
            .as_ref()
            .filter(|r| r.available)
            .and_then(|r| r.blob_url.as_deref())
    }
}

/// 已提交的生成任务
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub token: String,
    pub job_id: String,
    pub input: GenerationInput,
}

/// 阻塞式 API 客户端
pub struct CivitaiClient {
    client: Client,
    api_token: String,
    endpoint: String,
}

impl CivitaiClient {
    pub fn new(api_token: &str) -> Result<Self, Error> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            api_token: resolve_api_token(api_token),
            endpoint: ORCHESTRATION_ENDPOINT.to_string(),
        })
    }

    #[cfg(test)]
    fn with_endpoint(api_token: &str, endpoint: impl Into<String>) -> Result<Self, Error> {
        let mut this = Self::new(api_token)?;
        this.endpoint = endpoint.into();
        Ok(this)
    }

    /// 提交一个 textToImage 任务
    pub fn submit(&self, input: &GenerationInput) -> Result<GenerationJob, Error> {
        let request = JobRequest {
            job_type: "textToImage",
            input,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("wait", "false")])
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()?;
        if !response.status().is_success() {
            return Err(Error::InvalidApiResponse(format!(
                "job submission failed with status {}",
                response.status()
            )));
        }

        let body: SubmitResponse = response.json()?;
        let job_id = body
            .jobs
            .first()
            .map(|job| job.job_id.clone())
            .ok_or_else(|| {
                Error::InvalidApiResponse("submit response contains no jobs".to_string())
            })?;

        Ok(GenerationJob {
            token: body.token,
            job_id,
            input: input.clone(),
        })
    }

    /// 按轮询 token 查询任务状态
    pub fn query_jobs(&self, token: &str) -> Result<JobStatusResponse, Error> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("token", token), ("detailed", "false")])
            .bearer_auth(&self.api_token)
            .send()?;
        if !response.status().is_success() {
            return Err(Error::InvalidApiResponse(format!(
                "job query failed with status {}",
                response.status()
            )));
        }

        Ok(response.json()?)
    }

    /// 下载生成的图片字节
    pub fn fetch_image(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(Error::ImageDownload(response.status().as_u16()));
        }

        Ok(response.bytes()?.to_vec())
    }
}

impl JobStatusSource for CivitaiClient {
    fn job_status(&mut self, token: &str, job_id: &str) -> Result<JobStatus, Error> {
        let response = self.query_jobs(token)?;
        response
            .jobs
            .into_iter()
            .find(|job| job.job_id == job_id)
            .ok_or_else(|| {
                Error::InvalidApiResponse(format!("job {job_id} missing from status response"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_api_token_precedence() {
        // 显式输入优先于环境变量
        assert_eq!(
            resolve_api_token_from("  abc  ", Some("env-tok".to_string())),
            "abc"
        );
        // 空输入时使用环境变量
        assert_eq!(
            resolve_api_token_from("", Some(" env-tok ".to_string())),
            "env-tok"
        );
        // 两者皆空时回退到公共 token
        assert_eq!(resolve_api_token_from("", None), DEFAULT_API_TOKEN);
        assert_eq!(
            resolve_api_token_from("", Some("  ".to_string())),
            DEFAULT_API_TOKEN
        );
    }

    #[test]
    fn test_generation_input_wire_format() -> anyhow::Result<()> {
        let mut networks = BTreeMap::new();
        networks.insert(
            "urn:air:sd1:lora:civitai:123@456".to_string(),
            LoraNetwork {
                r#type: "Lora".to_string(),
                strength: 0.8,
            },
        );
        let input = GenerationInput {
            model: "urn:air:sd1:checkpoint:civitai:4201@130072".to_string(),
            params: GenerationParams {
                prompt: "a cat".to_string(),
                negative_prompt: "blurry".to_string(),
                scheduler: "EulerA".to_string(),
                steps: 20,
                cfg_scale: 7.0,
                width: 1024,
                height: 768,
                clip_skip: 2,
                seed: 42,
            },
            additional_networks: Some(networks),
        };

        let value = serde_json::to_value(&input)?;
        assert_eq!(value["params"]["negativePrompt"], "blurry");
        assert_eq!(value["params"]["cfgScale"], 7.0);
        assert_eq!(value["params"]["clipSkip"], 2);
        assert_eq!(
            value["additionalNetworks"]["urn:air:sd1:lora:civitai:123@456"]["strength"],
            0.8
        );

        // 无 LoRA 时不应出现 additionalNetworks 字段
        let bare = GenerationInput {
            additional_networks: None,
            ..input
        };
        let value = serde_json::to_value(&bare)?;
        assert!(value.get("additionalNetworks").is_none());
        Ok(())
    }

    #[test]
    fn test_job_status_available_url() -> anyhow::Result<()> {
        let status: JobStatus = serde_json::from_str(
            r#"{
                "jobId": "j-1",
                "status": "Succeeded",
                "result": {"available": true, "blobUrl": "https://img.example/j-1.png"}
            }"#,
        )?;
        assert_eq!(status.available_url(), Some("https://img.example/j-1.png"));
        assert!(!status.is_failed());

        let pending: JobStatus = serde_json::from_str(
            r#"{"jobId": "j-2", "status": "Scheduled", "result": {"available": false}}"#,
        )?;
        assert_eq!(pending.available_url(), None);

        let failed: JobStatus =
            serde_json::from_str(r#"{"jobId": "j-3", "status": "Failed", "error": "boom"}"#)?;
        assert!(failed.is_failed());
        Ok(())
    }

    #[test]
    #[ignore]
    fn test_submit_live() -> anyhow::Result<()> {
        let client = CivitaiClient::with_endpoint(DEFAULT_API_TOKEN, ORCHESTRATION_ENDPOINT)?;
        let input = GenerationInput {
            model: "urn:air:sd1:checkpoint:civitai:4201@130072".to_string(),
            params: GenerationParams {
                prompt: "a lighthouse at dusk".to_string(),
                negative_prompt: String::new(),
                scheduler: "EulerA".to_string(),
                steps: 20,
                cfg_scale: 7.0,
                width: 512,
                height: 512,
                clip_skip: 2,
                seed: 1,
            },
            additional_networks: None,
        };
        let job = client.submit(&input)?;
        println!("token: {}, job_id: {}", job.token, job.job_id);
        Ok(())
    }
}
