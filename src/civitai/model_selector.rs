//! 检查点选择节点
//!
//! 每个模型家族一个节点: 缩略图下拉选择 -> 清单查找 -> 按需下载权重 ->
//! 委托宿主 CheckpointLoaderSimple 加载

use std::{fs, path::PathBuf};

use log::error;
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyErr, PyResult, Python,
};
use sha2::{Digest, Sha256};
use strum_macros::{Display, EnumString};

use crate::{
    core::category::CATEGORY_BJORNULF,
    error::Error,
    wrapper::comfy::{
        folder_paths::{FolderPaths, IMAGE_EXTENSIONS},
        init_folder_paths::{civitai_base_path, parsed_models_path, CHECKPOINT_SUBDIR},
        nodes::load_checkpoint,
    },
    wrapper::comfyui::{
        types::{NODE_CLIP, NODE_MODEL, NODE_STRING, NODE_VAE},
        PromptServer,
    },
};

use super::{
    download::ensure_downloaded,
    manifest::{find_by_image, load_manifest, ManifestEntry},
};

/// 检查点家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ModelFamily {
    #[strum(to_string = "SD 1.5")]
    Sd15,
    #[strum(to_string = "SDXL 1.0")]
    Sdxl,
    #[strum(to_string = "FLUX.1 D")]
    FluxD,
    #[strum(to_string = "FLUX.1 S")]
    FluxS,
    #[strum(to_string = "Pony")]
    Pony,
}

impl ModelFamily {
    /// 缩略图文件夹名
    pub fn thumbnail_folder(&self) -> &'static str {
        match self {
            Self::Sd15 => "sd_1.5",
            Self::Sdxl => "sdxl_1.0",
            Self::FluxD => "flux.1_d",
            Self::FluxS => "flux.1_s",
            Self::Pony => "pony",
        }
    }

    /// 清单文件名
    pub fn manifest_file(&self) -> &'static str {
        match self {
            Self::Sd15 => "parsed_sd_1.5_models.json",
            Self::Sdxl => "parsed_sdxl_1.0_models.json",
            Self::FluxD => "parsed_flux.1_d_models.json",
            Self::FluxS => "parsed_flux.1_s_models.json",
            Self::Pony => "parsed_pony_models.json",
        }
    }

    /// 权重落盘子目录, 历史目录名与缩略图文件夹不完全一致
    pub fn checkpoint_subdir(&self) -> &'static str {
        match self {
            Self::Sd15 => "sd1.5",
            Self::Sdxl => "sdxl_1.0",
            Self::FluxD => "flux_d",
            Self::FluxS => "flux_s",
            Self::Pony => "pony",
        }
    }
}

/// 缩略图下拉选项, 形如 `<folder>/<file>`, 空目录回退为 "none"
pub(super) fn thumbnail_choices(folder: &str) -> Vec<String> {
    let folder_paths = FolderPaths::default();
    let mut files: Vec<String> = folder_paths
        .get_filename_list(folder, &IMAGE_EXTENSIONS)
        .into_iter()
        .map(|file| format!("{folder}/{file}"))
        .collect();

    if files.is_empty() {
        return vec!["none".to_string()];
    }
    files.sort();
    files
}

/// 缩略图内容哈希, 用于 IS_CHANGED 触发重载
pub(super) fn thumbnail_hash(image: &str) -> String {
    if image == "none" {
        return String::new();
    }

    let image_path = civitai_base_path(&FolderPaths::default()).join(image);
    let Ok(bytes) = fs::read(&image_path) else {
        return String::new();
    };

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.update(image.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 按缩略图取清单条目
pub(super) fn resolve_entry(manifest_file: &str, image: &str) -> Result<ManifestEntry, Error> {
    if image == "none" {
        return Err(Error::InvalidParameter("no image selected".to_string()));
    }

    let manifest_path = parsed_models_path(&FolderPaths::default()).join(manifest_file);
    let entries = load_manifest(&manifest_path)?;
    Ok(find_by_image(&entries, image)?.clone())
}

/// 确保检查点权重已就绪, 返回传给宿主加载器的相对路径
fn prepare_checkpoint(family: ModelFamily, entry: &ManifestEntry, token: &str) -> Result<String, Error> {
    let checkpoint_dir: PathBuf = FolderPaths::default()
        .model_path()
        .join("checkpoints")
        .join(CHECKPOINT_SUBDIR)
        .join(family.checkpoint_subdir());
    ensure_downloaded(&entry.download_url, &checkpoint_dir, &entry.name, token)?;

    Ok(format!(
        "{}/{}/{}.safetensors",
        CHECKPOINT_SUBDIR,
        family.checkpoint_subdir(),
        entry.name
    ))
}

macro_rules! model_selector_node {
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
                (NODE_MODEL, NODE_CLIP, NODE_VAE, NODE_STRING, NODE_STRING)
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
                ("model", "clip", "vae", "name", "civitai_url")
            }

            #[classattr]
            #[pyo3(name = "CATEGORY")]
            const CATEGORY: &'static str = CATEGORY_BJORNULF;

            #[classattr]
            #[pyo3(name = "DESCRIPTION")]
            fn description() -> String {
                format!(
                    "Pick a {} checkpoint by thumbnail. Downloads the weights from Civitai on first use.",
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
            fn execute<'py>(
                &mut self,
                py: Python<'py>,
                image: &str,
                civitai_token: &str,
            ) -> PyResult<(
                Bound<'py, PyAny>,
                Bound<'py, PyAny>,
                Bound<'py, PyAny>,
                String,
                String,
            )> {
                let prepared = resolve_entry($family.manifest_file(), image).and_then(|entry| {
                    let ckpt_name = prepare_checkpoint($family, &entry, civitai_token)?;
                    Ok((entry, ckpt_name))
                });

                match prepared {
                    Ok((entry, ckpt_name)) => {
                        let (model, clip, vae) = load_checkpoint(py, &ckpt_name)?;
                        Ok((model, clip, vae, entry.name.clone(), entry.civitai_url()))
                    }
                    Err(e) => {
                        error!("checkpoint selection failed, {e}");
                        if let Err(e) =
                            self.send_error(py, "CIVITAI_MODEL_ERROR".to_string(), e.to_string())
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

model_selector_node!(CivitaiModelSelectorSd15, ModelFamily::Sd15);
model_selector_node!(CivitaiModelSelectorSdxl, ModelFamily::Sdxl);
model_selector_node!(CivitaiModelSelectorFluxD, ModelFamily::FluxD);
model_selector_node!(CivitaiModelSelectorFluxS, ModelFamily::FluxS);
model_selector_node!(CivitaiModelSelectorPony, ModelFamily::Pony);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_paths() {
        assert_eq!(ModelFamily::Sd15.thumbnail_folder(), "sd_1.5");
        assert_eq!(ModelFamily::Sd15.checkpoint_subdir(), "sd1.5");
        assert_eq!(ModelFamily::FluxD.manifest_file(), "parsed_flux.1_d_models.json");
        assert_eq!(ModelFamily::Pony.to_string(), "Pony");
    }

    #[test]
    fn test_thumbnail_hash_handles_missing_file() {
        assert_eq!(thumbnail_hash("none"), "");
        assert_eq!(thumbnail_hash("sd_1.5/definitely_missing.png"), "");
    }
}
