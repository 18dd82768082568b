//! 附加 LoRA 节点
//!
//! 输出可链式拼接的 additionalNetworks JSON, 供生成节点合并进任务输入

use std::collections::BTreeMap;

use log::error;
use pyo3::{
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyResult, Python,
};
use serde_json::json;

use crate::{
    core::category::CATEGORY_CIVITAI,
    error::Error,
    wrapper::comfyui::{
        types::{NODE_ADD_LORA, NODE_FLOAT, NODE_STRING},
        PromptServer,
    },
};

use super::client::LoraNetwork;

/// 附加 LoRA
#[pyclass(subclass)]
pub struct CivitaiAddLora {}

impl PromptServer for CivitaiAddLora {}

#[pymethods]
impl CivitaiAddLora {
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
                    "lora_urn",
                    (NODE_STRING, {
                        let lora_urn = PyDict::new(py);
                        lora_urn.set_item("multiline", false)?;
                        lora_urn.set_item("default", "urn:air:flux1:lora:civitai:790034@883473")?;
                        lora_urn
                    }),
                )?;
                required.set_item(
                    "strength",
                    (NODE_FLOAT, {
                        let strength = PyDict::new(py);
                        strength.set_item("default", 1.0)?;
                        strength.set_item("min", 0.0)?;
                        strength.set_item("max", 2.0)?;
                        strength.set_item("step", 0.01)?;
                        strength
                    }),
                )?;
                required
            })?;
            dict.set_item("optional", {
                let optional = PyDict::new(py);
                optional.set_item(
                    "add_LORA",
                    (NODE_ADD_LORA, {
                        let add_lora = PyDict::new(py);
                        add_lora.set_item("forceInput", true)?;
                        add_lora
                    }),
                )?;
                optional
            })?;
            Ok(dict.into())
        })
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types() -> (&'static str,) {
        (NODE_ADD_LORA,)
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("add_LORA",)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_CIVITAI;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Add a LoRA to a Civitai generation request. Chain several nodes to stack LoRAs."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "execute";

    #[pyo3(name = "execute", signature = (lora_urn, strength, add_LORA=None))]
    #[allow(non_snake_case)]
    fn execute(
        &mut self,
        lora_urn: &str,
        strength: f64,
        add_LORA: Option<&str>,
    ) -> PyResult<(String,)> {
        match merge_additional_networks(lora_urn, strength, add_LORA) {
            Ok(v) => Ok((v,)),
            Err(e) => {
                // 与上游节点约定: 合并失败时输出空集合而不是中断工作流
                error!("add lora failed, {e}");
                Ok((json!({"additionalNetworks": {}}).to_string(),))
            }
        }
    }
}

/// 合并链式 LoRA 输入
///
/// 链上游的同名 urn 覆盖本节点的设置
fn merge_additional_networks(
    lora_urn: &str,
    strength: f64,
    chained: Option<&str>,
) -> Result<String, Error> {
    let mut networks: BTreeMap<String, LoraNetwork> = BTreeMap::new();
    networks.insert(
        lora_urn.to_string(),
        LoraNetwork {
            r#type: "Lora".to_string(),
            strength,
        },
    );

    if let Some(chained) = chained.filter(|s| !s.trim().is_empty()) {
        let upstream: serde_json::Value = serde_json::from_str(chained)?;
        if let Some(additional) = upstream.get("additionalNetworks") {
            let upstream: BTreeMap<String, LoraNetwork> =
                serde_json::from_value(additional.clone())?;
            networks.extend(upstream);
        }
    }

    Ok(serde_json::to_string(
        &json!({"additionalNetworks": networks}),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_single_lora() -> anyhow::Result<()> {
        let merged = merge_additional_networks("urn:air:sd1:lora:civitai:1@2", 0.75, None)?;
        let value: serde_json::Value = serde_json::from_str(&merged)?;
        assert_eq!(
            value["additionalNetworks"]["urn:air:sd1:lora:civitai:1@2"]["strength"],
            0.75
        );
        assert_eq!(
            value["additionalNetworks"]["urn:air:sd1:lora:civitai:1@2"]["type"],
            "Lora"
        );
        Ok(())
    }

    #[test]
    fn test_merge_chained_loras() -> anyhow::Result<()> {
        let first = merge_additional_networks("urn:a", 0.5, None)?;
        let merged = merge_additional_networks("urn:b", 1.0, Some(&first))?;

        let value: serde_json::Value = serde_json::from_str(&merged)?;
        let networks = value["additionalNetworks"].as_object().unwrap();
        assert_eq!(networks.len(), 2);
        assert_eq!(networks["urn:a"]["strength"], 0.5);
        assert_eq!(networks["urn:b"]["strength"], 1.0);
        Ok(())
    }

    #[test]
    fn test_merge_upstream_overrides_duplicate_urn() -> anyhow::Result<()> {
        let first = merge_additional_networks("urn:a", 0.5, None)?;
        let merged = merge_additional_networks("urn:a", 1.0, Some(&first))?;

        let value: serde_json::Value = serde_json::from_str(&merged)?;
        assert_eq!(value["additionalNetworks"]["urn:a"]["strength"], 0.5);
        Ok(())
    }

    #[test]
    fn test_merge_rejects_invalid_chain() {
        let result = merge_additional_networks("urn:a", 1.0, Some("not json"));
        assert!(result.is_err());
    }
}
