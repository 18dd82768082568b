//! 宿主内置节点包装
//!
//! 通过 Python 端 nodes 模块委托检查点与 LoRA 的加载,
//! 权重解析与显存管理完全由宿主负责

use pyo3::{
    types::{PyAnyMethods, PyModule, PyTuple},
    Bound, PyAny, PyResult, Python,
};

/// 加载检查点
///
/// 等价于 nodes.CheckpointLoaderSimple().load_checkpoint(ckpt_name),
/// 返回 (MODEL, CLIP, VAE)
pub fn load_checkpoint<'py>(
    py: Python<'py>,
    ckpt_name: &str,
) -> PyResult<(Bound<'py, PyAny>, Bound<'py, PyAny>, Bound<'py, PyAny>)> {
    let nodes = PyModule::import(py, "nodes")?;
    let loader = nodes.getattr("CheckpointLoaderSimple")?.call0()?;
    let result = loader
        .getattr("load_checkpoint")?
        .call1((ckpt_name,))?
        .downcast_into::<PyTuple>()
        .map_err(pyo3::PyErr::from)?;

    Ok((result.get_item(0)?, result.get_item(1)?, result.get_item(2)?))
}

/// 加载 LoRA
///
/// 等价于 nodes.LoraLoader().load_lora(...), 返回 (MODEL, CLIP)
pub fn load_lora<'py>(
    py: Python<'py>,
    model: &Bound<'py, PyAny>,
    clip: &Bound<'py, PyAny>,
    lora_name: &str,
    strength_model: f64,
    strength_clip: f64,
) -> PyResult<(Bound<'py, PyAny>, Bound<'py, PyAny>)> {
    let nodes = PyModule::import(py, "nodes")?;
    let loader = nodes.getattr("LoraLoader")?.call0()?;
    let result = loader
        .getattr("load_lora")?
        .call1((model, clip, lora_name, strength_model, strength_clip))?
        .downcast_into::<PyTuple>()
        .map_err(pyo3::PyErr::from)?;

    Ok((result.get_item(0)?, result.get_item(1)?))
}
