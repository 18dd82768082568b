use log::error;
use pyo3::{
    pymodule,
    types::{PyDict, PyDictMethods, PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

mod error;

pub mod civitai;
pub mod core;
pub mod utils;
pub mod web;
pub mod wrapper;

pub use error::Error;

/// A Python module implemented in Rust.
#[pymodule]
#[pyo3(name = "comfyui_civitai")] // 需要与包名保持一致
fn py_init(py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();

    m.add_submodule(&civitai::submodule(py)?)?;
    m.add_submodule(&utils::submodule(py)?)?;

    // 注册 ComfyUI NODE_CLASS_MAPPINGS/NODE_DISPLAY_NAME_MAPPINGS
    let node_mapping = PyDict::new(py);
    let name_mapping = PyDict::new(py);

    let mut nodes = civitai::node_register(py)?;
    nodes.extend(utils::node_register(py)?);
    for node in nodes {
        node_mapping.set_item(node.0, node.1)?;
        name_mapping.set_item(node.0, node.2)?;
    }

    m.add("NODE_CLASS_MAPPINGS", node_mapping)?;
    m.add("NODE_DISPLAY_NAME_MAPPINGS", name_mapping)?;

    // 注册模型目录与 input 符号链接
    wrapper::comfy::init_folder_paths::apply_custom_paths();
    if let Err(e) = wrapper::comfy::init_folder_paths::register_host_paths(py) {
        error!("register host folder paths failed, {e}");
    }

    // 路由注册失败不阻止节点加载
    if let Err(e) = web::register_routes(py) {
        error!("register web routes failed, {e}");
    }

    Ok(())
}
