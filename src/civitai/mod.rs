//! CivitAI 在线生成与模型获取

use pyo3::{
    types::{PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

use crate::core::node::NodeRegister;

pub mod client;
pub mod download;
pub mod links;
pub mod manifest;
pub mod poll;

mod add_lora;
pub use add_lora::CivitaiAddLora;

mod generate;
pub use generate::ApiGenerateCivitai;

mod load_links;
pub use load_links::LoadCivitaiLinks;

mod model_selector;
pub use model_selector::{
    CivitaiModelSelectorFluxD, CivitaiModelSelectorFluxS, CivitaiModelSelectorPony,
    CivitaiModelSelectorSd15, CivitaiModelSelectorSdxl, ModelFamily,
};

mod lora_selector;
pub use lora_selector::{
    CivitaiLoraSelectorHunyuan, CivitaiLoraSelectorPony, CivitaiLoraSelectorSd15,
    CivitaiLoraSelectorSdxl, LoraFamily,
};

/// civitai 模块
pub fn submodule(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let submodule = PyModule::new(py, "civitai")?;
    submodule.add_class::<ApiGenerateCivitai>()?;
    submodule.add_class::<CivitaiAddLora>()?;
    submodule.add_class::<LoadCivitaiLinks>()?;
    submodule.add_class::<CivitaiModelSelectorSd15>()?;
    submodule.add_class::<CivitaiModelSelectorSdxl>()?;
    submodule.add_class::<CivitaiModelSelectorFluxD>()?;
    submodule.add_class::<CivitaiModelSelectorFluxS>()?;
    submodule.add_class::<CivitaiModelSelectorPony>()?;
    submodule.add_class::<CivitaiLoraSelectorSd15>()?;
    submodule.add_class::<CivitaiLoraSelectorSdxl>()?;
    submodule.add_class::<CivitaiLoraSelectorPony>()?;
    submodule.add_class::<CivitaiLoraSelectorHunyuan>()?;
    Ok(submodule)
}

/// Civitai node register
pub fn node_register(py: Python<'_>) -> PyResult<Vec<NodeRegister<'_>>> {
    let nodes: Vec<NodeRegister> = vec![
        NodeRegister(
            "ApiGenerateCivitai",
            py.get_type::<ApiGenerateCivitai>(),
            "Civitai API Generate",
        ),
        NodeRegister(
            "CivitaiAddLora",
            py.get_type::<CivitaiAddLora>(),
            "Civitai Add LoRA",
        ),
        NodeRegister(
            "LoadCivitaiLinks",
            py.get_type::<LoadCivitaiLinks>(),
            "Civitai Load Links",
        ),
        NodeRegister(
            "CivitaiModelSelectorSd15",
            py.get_type::<CivitaiModelSelectorSd15>(),
            "Civitai Model Selector SD 1.5",
        ),
        NodeRegister(
            "CivitaiModelSelectorSdxl",
            py.get_type::<CivitaiModelSelectorSdxl>(),
            "Civitai Model Selector SDXL",
        ),
        NodeRegister(
            "CivitaiModelSelectorFluxD",
            py.get_type::<CivitaiModelSelectorFluxD>(),
            "Civitai Model Selector FLUX.1 D",
        ),
        NodeRegister(
            "CivitaiModelSelectorFluxS",
            py.get_type::<CivitaiModelSelectorFluxS>(),
            "Civitai Model Selector FLUX.1 S",
        ),
        NodeRegister(
            "CivitaiModelSelectorPony",
            py.get_type::<CivitaiModelSelectorPony>(),
            "Civitai Model Selector Pony",
        ),
        NodeRegister(
            "CivitaiLoraSelectorSd15",
            py.get_type::<CivitaiLoraSelectorSd15>(),
            "Civitai LoRA Selector SD 1.5",
        ),
        NodeRegister(
            "CivitaiLoraSelectorSdxl",
            py.get_type::<CivitaiLoraSelectorSdxl>(),
            "Civitai LoRA Selector SDXL",
        ),
        NodeRegister(
            "CivitaiLoraSelectorPony",
            py.get_type::<CivitaiLoraSelectorPony>(),
            "Civitai LoRA Selector Pony",
        ),
        NodeRegister(
            "CivitaiLoraSelectorHunyuan",
            py.get_type::<CivitaiLoraSelectorHunyuan>(),
            "Civitai LoRA Selector Hunyuan Video",
        ),
    ];
    Ok(nodes)
}
