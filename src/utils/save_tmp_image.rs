//! 临时图片保存节点
//!
//! 固定覆盖写 `./output/tmp_api.png`, 并把工作流元数据写入 PNG 文本块,
//! 供外部 API 消费最近一次生成结果

use std::{fs, io::BufWriter, path::Path};

use candle_core::Device;
use log::{error, info};
use pyo3::{
    exceptions::PyRuntimeError,
    pyclass, pymethods,
    types::{PyDict, PyDictMethods, PyType},
    Bound, Py, PyAny, PyErr, PyResult, Python,
};

use crate::{
    core::{category::CATEGORY_BJORNULF, utils::image::tensor_to_image},
    error::Error,
    wrapper::{
        comfyui::{types::NODE_IMAGE, PromptServer},
        torch::tensor::TensorWrapper,
    },
};

const OUTPUT_FILENAME: &str = "./output/tmp_api.png";

/// 保存临时图片
#[pyclass(subclass)]
pub struct SaveTmpImage {}

impl PromptServer for SaveTmpImage {}

#[pymethods]
impl SaveTmpImage {
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
                    (NODE_IMAGE, {
                        let image = PyDict::new(py);
                        image.set_item("forceInput", true)?;
                        image
                    }),
                )?;
                required
            })?;
            dict.set_item("hidden", {
                let hidden = PyDict::new(py);
                hidden.set_item("prompt", "PROMPT")?;
                hidden.set_item("extra_pnginfo", "EXTRA_PNGINFO")?;
                hidden
            })?;
            Ok(dict.into())
        })
    }

    #[classattr]
    #[pyo3(name = "RETURN_TYPES")]
    fn return_types(py: Python<'_>) -> Py<pyo3::types::PyTuple> {
        pyo3::types::PyTuple::empty(py).into()
    }

    #[classattr]
    #[pyo3(name = "OUTPUT_NODE")]
    fn output_node() -> bool {
        true
    }

    #[classattr]
    #[pyo3(name = "CATEGORY")]
    const CATEGORY: &'static str = CATEGORY_BJORNULF;

    #[classattr]
    #[pyo3(name = "DESCRIPTION")]
    fn description() -> &'static str {
        "Save the image to output/tmp_api.png, overwriting the previous one."
    }

    #[classattr]
    #[pyo3(name = "FUNCTION")]
    const FUNCTION: &'static str = "execute";

    #[pyo3(name = "execute", signature = (image, prompt=None, extra_pnginfo=None))]
    fn execute(
        &mut self,
        py: Python<'_>,
        image: Bound<'_, PyAny>,
        prompt: Option<Bound<'_, PyAny>>,
        extra_pnginfo: Option<Bound<'_, PyDict>>,
    ) -> PyResult<Py<PyDict>> {
        let result = self.save_image(py, &image, prompt.as_ref(), extra_pnginfo.as_ref());

        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("save tmp image failed, {e}");
                if let Err(e) = self.send_error(py, "SAVE_TMP_IMAGE_ERROR".to_string(), e.to_string())
                {
                    error!("send error failed, {e}");
                }
                Err(PyErr::new::<PyRuntimeError, _>(e.to_string()))
            }
        }
    }
}

impl SaveTmpImage {
    fn save_image(
        &self,
        py: Python<'_>,
        image: &Bound<'_, PyAny>,
        prompt: Option<&Bound<'_, PyAny>>,
        extra_pnginfo: Option<&Bound<'_, PyDict>>,
    ) -> Result<Py<PyDict>, Error> {
        let tensor = TensorWrapper::<f32>::new(image, &Device::Cpu)?.into_tensor();
        let image = tensor_to_image(&tensor)?;

        let metadata = collect_metadata(prompt, extra_pnginfo)?;
        write_png_with_metadata(Path::new(OUTPUT_FILENAME), &image, &metadata)?;
        info!("temporary image saved as: {OUTPUT_FILENAME}");

        // {"ui": {"images": [{"filename": ..., "type": "output"}]}}
        let result = PyDict::new(py);
        let ui = PyDict::new(py);
        let entry = PyDict::new(py);
        entry.set_item("filename", OUTPUT_FILENAME)?;
        entry.set_item("type", "output")?;
        ui.set_item("images", vec![entry])?;
        result.set_item("ui", ui)?;
        Ok(result.into())
    }
}

/// 收集隐藏输入并序列化为 PNG 文本块键值
fn collect_metadata(
    prompt: Option<&Bound<'_, PyAny>>,
    extra_pnginfo: Option<&Bound<'_, PyDict>>,
) -> Result<Vec<(String, String)>, Error> {
    let mut metadata = Vec::new();

    if let Some(prompt) = prompt {
        let value: serde_json::Value = pythonize::depythonize(prompt)?;
        metadata.push(("prompt".to_string(), latin1_coerce(&serde_json::to_string(&value)?)));
    }
    if let Some(extra) = extra_pnginfo {
        let value: serde_json::Value = pythonize::depythonize(extra.as_any())?;
        if let serde_json::Value::Object(map) = value {
            for (k, v) in map {
                metadata.push((latin1_coerce(&k), latin1_coerce(&serde_json::to_string(&v)?)));
            }
        }
    }

    Ok(metadata)
}

/// tEXt 块只接受 ISO-8859-1, 超出范围的字符替换为 '?'
fn latin1_coerce(text: &str) -> String {
    text.chars()
        .map(|c| if (c as u32) <= 0xFF { c } else { '?' })
        .collect()
}

/// 写 PNG 并附带 tEXt 元数据块
fn write_png_with_metadata(
    path: &Path,
    image: &image::DynamicImage,
    metadata: &[(String, String)],
) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let rgb = image.to_rgb8();
    let file = fs::File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, rgb.width(), rgb.height());
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    for (keyword, text) in metadata {
        encoder.add_text_chunk(keyword.clone(), text.clone())?;
    }

    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgb.as_raw())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_png_with_metadata_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tmp_api.png");

        let image = image::DynamicImage::new_rgb8(4, 2);
        let metadata = vec![
            ("prompt".to_string(), r#"{"1":{"class_type":"KSampler"}}"#.to_string()),
            ("workflow".to_string(), r#"{"nodes":[]}"#.to_string()),
        ];
        write_png_with_metadata(&path, &image, &metadata)?;

        let decoder = png::Decoder::new(std::fs::File::open(&path)?);
        let reader = decoder.read_info()?;
        let info = reader.info();
        assert_eq!(info.width, 4);
        assert_eq!(info.height, 2);

        let texts: Vec<(String, String)> = info
            .uncompressed_latin1_text
            .iter()
            .map(|chunk| (chunk.keyword.clone(), chunk.text.clone()))
            .collect();
        assert!(texts.contains(&metadata[0]));
        assert!(texts.contains(&metadata[1]));
        Ok(())
    }

    #[test]
    fn test_latin1_coerce() {
        assert_eq!(latin1_coerce("plain ascii"), "plain ascii");
        assert_eq!(latin1_coerce("caf\u{e9}"), "caf\u{e9}");
        assert_eq!(latin1_coerce("猫 cat"), "? cat");
    }

    #[test]
    fn test_write_png_overwrites_existing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tmp_api.png");

        write_png_with_metadata(&path, &image::DynamicImage::new_rgb8(2, 2), &[])?;
        write_png_with_metadata(&path, &image::DynamicImage::new_rgb8(8, 8), &[])?;

        let decoder = png::Decoder::new(std::fs::File::open(&path)?);
        let reader = decoder.read_info()?;
        assert_eq!(reader.info().width, 8);
        Ok(())
    }
}
