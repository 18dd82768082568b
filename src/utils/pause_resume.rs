//! 工作流暂停节点
//!
//! 执行到此节点时阻塞, 由 `/bjornulf_resume` 与 `/bjornulf_stop`
//! 两个 HTTP 端点放行或终止

use log::{error, info};
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyErr, PyResult, Python,
};

use crate::{
    core::category::CATEGORY_BJORNULF,
    utils::pause_gate::{GateSignal, WORKFLOW_GATE},
    wrapper::comfyui::{
        types::{any_type, NODE_INT},
        PromptServer,
    },
};

/// 暂停工作流
#[pyclass(subclass)]
pub struct PauseWorkflow {}

impl PromptServer for PauseWorkflow {}

#[pymethods]
impl PauseWorkflow {
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
                    "input",
                    (any_type(py)?, {
                        let input = PyDict::new(py);
                        input.set_item("forceInput", true)?;
                        input
                    }),
                )?;
                required.set_item(
                    "seed",
                    (NODE_INT, {
                        let seed = PyDict::new(py);
                        seed.set_item("default", 1)?;
                        seed
                    }),
                )?;
                required
            })?;
            Ok(dict.into())
        })
    }

    /// 输出类型为通配, 原样透传上游输入
    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types(py: Python<'_>) -> PyResult<(Bound<'_, PyAny>,)> {
        Ok((any_type(py)?,))
    }

    #[classattr]
    #[pyo3(name = "RETURN_NAMES")]
    fn return_names() -> (&'static str,) {
        ("output",)
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_BJORNULF;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Pause the workflow until resumed or stopped from the web interface."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "execute";

    #[pyo3(name = "execute")]
    fn execute<'py>(
        &mut self,
        py: Python<'py>,
        input: Bound<'py, PyAny>,
        seed: i64,
    ) -> PyResult<(Bound<'py, PyAny>,)> {
        let _ = seed;
        info!("workflow paused, waiting for resume or stop");

        // 等待期间释放 GIL, 否则 HTTP 端点无法执行
        let signal = py.allow_threads(|| WORKFLOW_GATE.wait());

        match signal {
            GateSignal::Resumed => {
                info!("workflow resumed");
                Ok((input,))
            }
            GateSignal::Stopped => {
                let message = "Workflow stopped by user";
                error!("{message}");
                if let Err(e) = self.send_error(py, "WORKFLOW_STOPPED".to_string(), message.to_string())
                {
                    error!("send error failed, {e}");
                }
                Err(PyErr::new::<PyRuntimeError, _>(message))
            }
        }
    }
}
