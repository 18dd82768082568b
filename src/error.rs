//! 错误处理

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // 标准库错误处理
    #[error("io error, {0}")]
    Io(std::io::Error),
    #[error("parse int error, {0}")]
    ParseIntError(std::num::ParseIntError),
    #[error("lock error, {0}")]
    LockError(String),
    #[error("option none, {0}")]
    OptionNone(String),

    #[error("encode error, {0}")]
    Encode(String),
    #[error("decode error, {0}")]
    Decode(String),

    #[error("py error, {0}")]
    PyErr(#[from] pyo3::PyErr),
    #[error("pythonize error, {0}")]
    PythonizeError(#[from] pythonize::PythonizeError),
    #[error("py downcast error, {0}")]
    PyDowncastError(String),

    #[error("tensor error, {0}")]
    TensorErr(#[from] candle_core::Error),
    #[error("numpy error, {0}")]
    NotContiguousError(#[from] numpy::NotContiguousError),
    #[error("strum error, {0}")]
    ParseEnumString(String),

    #[error("creating image buffer error")]
    ImageBuffer,
    #[error("image error, {0}")]
    ImageError(#[from] image::ImageError),
    #[error("png encoding error, {0}")]
    PngEncodingError(#[from] png::EncodingError),
    #[error("unsupported number of channels, {0}")]
    UnsupportedNumberOfChannels(u32),
    #[error("invalid tensor shape, {0}")]
    InvalidTensorShape(String),

    #[error("http error, {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error, {0}")]
    Json(#[from] serde_json::Error),

    // CivitAI API
    #[error("api token is required")]
    MissingApiToken,
    #[error("model_urn is required")]
    MissingModelUrn,
    #[error("invalid model urn, {0}")]
    InvalidModelUrn(String),
    #[error("invalid api response, {0}")]
    InvalidApiResponse(String),
    #[error("job failed, {0}")]
    JobFailed(String),
    #[error("job timed out after {0} seconds")]
    JobTimeout(u64),
    #[error("generation interrupted by user")]
    Interrupted,
    #[error("workflow stopped by user")]
    WorkflowStopped,
    #[error("image download failed, status {0}")]
    ImageDownload(u16),
    #[error("download failed, {0}")]
    Download(String),

    // 链接文件
    #[error("invalid link format, {0}")]
    InvalidLinkFormat(String),
    #[error("no valid links source provided")]
    NoLinksSource,
    #[error("no images loaded from the provided links")]
    NoImagesLoaded,

    // 模型清单
    #[error("no model information found for image, {0}")]
    ManifestEntryNotFound(String),

    #[error("file not found, {0}")]
    FileNotFound(String),
    #[error("invalid directory, {0}")]
    InvalidDirectory(String),
    #[error("invalid parameter, {0}")]
    InvalidParameter(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::ParseIntError(e)
    }
}
