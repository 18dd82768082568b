//! web 端点
//!
//! 路由挂在宿主 PromptServer 上, aiohttp 部分由内嵌的 Python 垫片承担,
//! 状态变更通过回调回到 Rust 侧

use std::path::Path;

use pyo3::{
    ffi::c_str, pyfunction, types::PyAnyMethods, types::PyModule, wrap_pyfunction, PyResult,
    Python,
};

use crate::{
    civitai::links::{list_links_files as links_files, LINKS_DIR},
    utils::pause_gate::WORKFLOW_GATE,
};

/// 放行暂停中的工作流
#[pyfunction]
fn gate_resume() {
    WORKFLOW_GATE.resume();
}

/// 终止暂停中的工作流
#[pyfunction]
fn gate_stop() {
    WORKFLOW_GATE.stop();
}

/// 链接目录下的文件列表, 目录不存在时返回 None
#[pyfunction]
fn list_links_files() -> Option<Vec<String>> {
    let links_dir = Path::new(LINKS_DIR);
    if !links_dir.exists() {
        return None;
    }
    Some(links_files(links_dir))
}

/// 注册 HTTP 路由
///
/// 宿主尚未启动 PromptServer 时注册会失败, 由调用方决定是否容忍
pub fn register_routes(py: Python<'_>) -> PyResult<()> {
    let shim = PyModule::from_code(
        py,
        c_str!(include_str!("routes.py")),
        c_str!("routes.py"),
        c_str!("comfyui_civitai_routes"),
    )?;

    shim.getattr("register")?.call1((
        wrap_pyfunction!(gate_resume, py)?,
        wrap_pyfunction!(gate_stop, py)?,
        wrap_pyfunction!(list_links_files, py)?,
    ))?;

    Ok(())
}
