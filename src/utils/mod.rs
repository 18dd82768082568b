//! 工作流工具节点

use pyo3::{
    types::{PyModule, PyModuleMethods},
    Bound, PyResult, Python,
};

use crate::core::node::NodeRegister;

pub mod pause_gate;

mod pause_resume;
pub use pause_resume::PauseWorkflow;

mod save_tmp_image;
pub use save_tmp_image::SaveTmpImage;

/// utils 模块
pub fn submodule(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let submodule = PyModule::new(py, "utils")?;
    submodule.add_class::<PauseWorkflow>()?;
    submodule.add_class::<SaveTmpImage>()?;
    Ok(submodule)
}

/// Utils node register
pub fn node_register(py: Python<'_>) -> PyResult<Vec<NodeRegister<'_>>> {
    let nodes: Vec<NodeRegister> = vec![
        NodeRegister(
            "PauseWorkflow",
            py.get_type::<PauseWorkflow>(),
            "Pause Workflow",
        ),
        NodeRegister(
            "SaveTmpImage",
            py.get_type::<SaveTmpImage>(),
            "Save Tmp Image",
        ),
    ];
    Ok(nodes)
}
