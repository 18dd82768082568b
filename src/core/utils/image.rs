//! image 与 tensor 相互转换

use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, GenericImageView, GrayImage, RgbImage, RgbaImage};

use crate::error::Error;

/// 将图像转换为张量
///
/// output: HWC
pub fn image_to_tensor(image: &DynamicImage, device: &Device) -> Result<Tensor, Error> {
    let (width, height) = image.dimensions();

    let img_buffer = image.to_rgb32f().into_raw();
    // HWC
    let tensor = Tensor::from_vec(img_buffer, (height as usize, width as usize, 3), device)?;

    Ok(tensor)
}

/// 将图像转换为批量张量
///
/// output: 1HWC, 与 ComfyUI IMAGE 类型一致
pub fn image_to_batch_tensor(image: &DynamicImage, device: &Device) -> Result<Tensor, Error> {
    Ok(image_to_tensor(image, device)?.unsqueeze(0)?)
}

/// 空图像占位张量
///
/// output: [1, 512, 512, 3] 全零
pub fn empty_image_tensor(device: &Device) -> Result<Tensor, Error> {
    Ok(Tensor::zeros((1, 512, 512, 3), DType::F32, device)?)
}

/// 解码图像字节并转换为 RGB
pub fn decode_rgb_image(bytes: &[u8]) -> Result<DynamicImage, Error> {
    let image = image::load_from_memory(bytes)?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// 将张量转换为图像
///
/// tensor: HWC/1HWC
pub fn tensor_to_image(tensor: &Tensor) -> Result<DynamicImage, Error> {
    // 检查张量形状
    let (height, width, channels) = match tensor.dims() {
        [h, w, c] => (*h, *w, *c),
        [b, h, w, c] if *b == 1 => (*h, *w, *c),
        _ => {
            return Err(Error::InvalidTensorShape(format!(
                "Invalid tensor shape: {:#?}",
                tensor.dims()
            )));
        }
    };

    // 1HWC -> HWC
    let tensor = match tensor.dims() {
        [1, _, _, _] => tensor.squeeze(0)?,
        _ => tensor.clone(),
    };

    let tensor = (tensor.to_dtype(DType::F32)? * 255.0)?;
    let tensor = tensor.clamp(0.0, 255.0)?;
    let tensor = tensor.to_dtype(DType::U8)?;

    // 转换为缓存
    let buffer = tensor.contiguous()?.flatten_all()?.to_vec1()?;

    // 转换为图像
    match channels {
        1 => {
            let img = GrayImage::from_raw(width as u32, height as u32, buffer)
                .ok_or(Error::ImageBuffer)?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        3 => {
            let img = RgbImage::from_raw(width as u32, height as u32, buffer)
                .ok_or(Error::ImageBuffer)?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        4 => {
            let img = RgbaImage::from_raw(width as u32, height as u32, buffer)
                .ok_or(Error::ImageBuffer)?;
            Ok(DynamicImage::ImageRgba8(img))
        }
        _ => Err(Error::UnsupportedNumberOfChannels(channels as u32)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tensor_round_trip() -> anyhow::Result<()> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 128])));

        let tensor = image_to_batch_tensor(&img, &Device::Cpu)?;
        assert_eq!(tensor.dims(), &[1, 2, 4, 3]);

        let back = tensor_to_image(&tensor)?;
        assert_eq!(back.dimensions(), (4, 2));
        Ok(())
    }

    #[test]
    fn test_empty_image_tensor() -> anyhow::Result<()> {
        let tensor = empty_image_tensor(&Device::Cpu)?;
        assert_eq!(tensor.dims(), &[1, 512, 512, 3]);
        Ok(())
    }
}
