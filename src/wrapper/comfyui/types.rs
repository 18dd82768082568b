//! 类型定义
//! 相关节点定义: ComfyUI/comfy/comfy_types/node_typing.py

use pyo3::{ffi::c_str, Bound, PyResult, Python};

pub const NODE_INT: &str = "INT";
pub const NODE_FLOAT: &str = "FLOAT";
pub const NODE_STRING: &str = "STRING";
pub const NODE_BOOLEAN: &str = "BOOLEAN";
pub const NODE_IMAGE: &str = "IMAGE";
pub const NODE_MODEL: &str = "MODEL";
pub const NODE_CLIP: &str = "CLIP";
pub const NODE_VAE: &str = "VAE";

/// add_LORA 链式输入的自定义类型
pub const NODE_ADD_LORA: &str = "add_LORA";

pub const NODE_SEED_MAX: i64 = 0x7FFF_FFFF_FFFF_FFFF;

/// 任意类型
pub fn any_type(py: Python<'_>) -> PyResult<Bound<'_, pyo3::PyAny>> {
    let code = c_str!(
        "class AlwaysEqualProxy(str):
            def __eq__(self, _):
                return True
            def __ne__(self, _):
                return False
        "
    );

    let globals = pyo3::types::PyDict::new(py);
    py.run(code, Some(&globals), None)?;
    py.eval(c_str!("AlwaysEqualProxy('*')"), Some(&globals), None)
}
