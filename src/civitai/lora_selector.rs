//! LoRA 选择节点
//!
//! 与检查点选择同构: 缩略图 -> 清单 -> 按需下载 -> 委托宿主 LoraLoader

use std::path::PathBuf;

use log::error;
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyErr, PyResult, Python,
};
use strum_macros::{Display, EnumString};

use crate::{
    core::category::CATEGORY_BJORNULF,
    error::Error,
    wrapper::comfy::{
        folder_paths::FolderPaths, init_folder_paths::CHECKPOINT_SUBDIR, nodes::load_lora,
    },
    wrapper::comfyui::{
        types::{NODE_CLIP, NODE_FLOAT, NODE_MODEL, NODE_STRING},
        PromptServer,
    },
};

use super::{
    download::ensure_downloaded,
    manifest::ManifestEntry,
    model_selector::{resolve_entry, thumbnail_choices, thumbnail_hash},
};

/// LoRA 家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum LoraFamily {
    #[strum(to_string = "SD 1.5")]
    Sd15,
    #[strum(to_string = "SDXL 1.0")]
    Sdxl,
    #[strum(to_string = "Pony")]
    Pony,
    #[strum(to_string = "Hunyuan Video")]
    Hunyuan,
}

impl LoraFamily {
    pub fn thumbnail_folder(&self) -> &'static str {
        match self {
            Self::Sd15 => "lora_sd_1.5",
            Self::Sdxl => "lora_sdxl_1.0",
            Self::Pony => "lora_pony",
            Self::Hunyuan => "lora_hunyuan_video",
        }
    }

    pub fn manifest_file(&self) -> &'static str {
        match self {
            Self::Sd15 => "parsed_lora_sd_1.5_loras.json",
            Self::Sdxl => "parsed_lora_sdxl_1.0_loras.json",
            Self::Pony => "parsed_lora_pony_loras.json",
            Self::Hunyuan => "parsed_lora_hunyuan_video_loras.json",
        }
    }

    pub fn lora_subdir(&self) -> &'static str {
        match self {
            Self::Sd15 => "sd_1.5",
            Self::Sdxl => "sdxl_1.0",
            Self::Pony => "pony",
            Self::Hunyuan => "hunyuan_video",
        }
    }
}

/// 确保 LoRA 权重已就绪, 返回传给宿主加载器的相对路径
fn prepare_lora(family: LoraFamily, entry: &ManifestEntry, token: &str) -> Result<String, Error> {
    let lora_dir: PathBuf = FolderPaths::default()
        .model_path()
        .join("loras")
        .join(CHECKPOINT_SUBDIR)
        .join(family.lora_subdir());
    ensure_downloaded(&entry.download_url, &lora_dir, &entry.name, token)?;

    Ok(format!(
        "{}/{}/{}.safetensors",
        CHECKPOINT_SUBDIR,
        family.lora_subdir(),
        entry.name
    ))
}

macro_rules! lora_selector_node {
    ($name:ident, $family:expr) => {
        #[pyclass(subclass)]
        pub struct $name {}

        impl PromptServer for $name {}

        #[pymethods]
        impl $name {
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
                            "image",
                            (thumbnail_choices($family.thumbnail_folder()), {
                                let image = PyDict::new(py);
                                image.set_item("image_upload", true)?;
                                image
                            }),
                        )?;
                        required.set_item("model", (NODE_MODEL,))?;
                        required.set_item("clip", (NODE_CLIP,))?;
                        required.set_item(
                            "strength_model",
                            (NODE_FLOAT, {
                                let strength_model = PyDict::new(py);
                                strength_model.set_item("default", 1.0)?;
                                strength_model.set_item("min", -20.0)?;
                                strength_model.set_item("max", 20.0)?;
                                strength_model.set_item("step", 0.01)?;
                                strength_model
                            }),
                        )?;
                        required.set_item(
                            "strength_clip",
                            (NODE_FLOAT, {
                                let strength_clip = PyDict::new(py);
                                strength_clip.set_item("default", 1.0)?;
                                strength_clip.set_item("min", -20.0)?;
                                strength_clip.set_item("max", 20.0)?;
                                strength_clip.set_item("step", 0.01)?;
                                strength_clip
                            }),
                        )?;
                        required.set_item(
                            "civitai_token",
                            (NODE_STRING, {
                                let civitai_token = PyDict::new(py);
                                civitai_token.set_item("default", "")?;
                                civitai_token
                            }),
                        )?;
                        required
                    })?;
                    Ok(dict.into())
                })
            }

            #[classattr]
            #[pyo3(name = "RETURN_TYPES")]
            fn return_types() -> (
                &'static str,
                &'static str,
                &'static str,
                &'static str,
                &'static str,
            ) {
                (NODE_MODEL, NODE_CLIP, NODE_STRING, NODE_STRING, NODE_STRING)
            }

            #[classattr]
            #[pyo3(name = "RETURN_NAMES")]
            fn return_names() -> (
                &'static str,
                &'static str,
                &'static str,
                &'static str,
                &'static str,
            ) {
                ("model", "clip", "name", "civitai_url", "trigger_words")
            }

            #[classattr]
            #[pyo3(name = "CATEGORY")]
            const CATEGORY: &'static str = CATEGORY_BJORNULF;

            #[classattr]
            #[pyo3(name = "DESCRIPTION")]
            fn description() -> String {
                format!(
                    "Pick a {} LoRA by thumbnail. Downloads the weights from Civitai on first use.",
                    $family
                )
            }

            #[classattr]
            #[pyo3(name = "FUNCTION")]
            const FUNCTION: &'static str = "execute";

            #[classmethod]
            #[pyo3(name = "IS_CHANGED", signature = (image, **_kwargs))]
            fn is_changed(
                _cls: &Bound<'_, PyType>,
                image: &str,
                _kwargs: Option<&Bound<'_, PyDict>>,
            ) -> String {
                thumbnail_hash(image)
            }

            #[pyo3(name = "execute")]
            #[allow(clippy::too_many_arguments)]
            fn execute<'py>(
                &mut self,
                py: Python<'py>,
                image: &str,
                model: Bound<'py, PyAny>,
                clip: Bound<'py, PyAny>,
                strength_model: f64,
                strength_clip: f64,
                civitai_token: &str,
            ) -> PyResult<(
                Bound<'py, PyAny>,
                Bound<'py, PyAny>,
                String,
                String,
                String,
            )> {
                let prepared = resolve_entry($family.manifest_file(), image).and_then(|entry| {
                    let lora_name = prepare_lora($family, &entry, civitai_token)?;
                    Ok((entry, lora_name))
                });

                match prepared {
                    Ok((entry, lora_name)) => {
                        let (model_lora, clip_lora) = load_lora(
                            py,
                            &model,
                            &clip,
                            &lora_name,
                            strength_model,
                            strength_clip,
                        )?;
                        Ok((
                            model_lora,
                            clip_lora,
                            entry.name.clone(),
                            entry.civitai_url(),
                            entry.trained_words_joined(),
                        ))
                    }
                    Err(e) => {
                        error!("lora selection failed, {e}");
                        if let Err(e) =
                            self.send_error(py, "CIVITAI_LORA_ERROR".to_string(), e.to_string())
                        {
                            error!("send error failed, {e}");
                        }
                        Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
                    }
                }
            }
        }
    };
}

lora_selector_node!(CivitaiLoraSelectorSd15, LoraFamily::Sd15);
lora_selector_node!(CivitaiLoraSelectorSdxl, LoraFamily::Sdxl);
lora_selector_node!(CivitaiLoraSelectorPony, LoraFamily::Pony);
lora_selector_node!(CivitaiLoraSelectorHunyuan, LoraFamily::Hunyuan);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_paths() {
        assert_eq!(LoraFamily::Sd15.thumbnail_folder(), "lora_sd_1.5");
        assert_eq!(LoraFamily::Sd15.lora_subdir(), "sd_1.5");
        assert_eq!(
            LoraFamily::Hunyuan.manifest_file(),
            "parsed_lora_hunyuan_video_loras.json"
        );
        assert_eq!(LoraFamily::Hunyuan.to_string(), "Hunyuan Video");
    }
}
