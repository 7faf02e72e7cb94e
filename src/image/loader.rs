use crate::utils::error::GardenError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat};

/// 最大图像边长
const MAX_DIMENSION: u32 = 8192;

/// JPEG 结束标记 (EOI)
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

pub struct ImageLoader;

impl ImageLoader {
    /// 从base64字符串解码出原始字节
    pub fn bytes_from_base64(base64_data: &str) -> Result<Vec<u8>> {
        // 检测并移除可能的数据URL前缀 (data:image/xxx;base64,)
        let base64_clean = match base64_data.strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
            None => base64_data,
        };

        Ok(base64::engine::general_purpose::STANDARD.decode(base64_clean.trim())?)
    }

    /// 从字节加载图像
    pub fn from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(GardenError::Decode("Empty image payload".to_string()));
        }

        let format = Self::detect_format(bytes)
            .ok_or_else(|| GardenError::Decode("Unrecognized image format".to_string()))?;
        if !Self::is_supported_format(format) {
            return Err(GardenError::Decode(format!("Unsupported image format: {:?}", format)));
        }

        // JPEG 解码器会把缺失的扫描数据补成灰色，截断必须在解码前拦住
        if format == ImageFormat::Jpeg && !Self::has_jpeg_end_marker(bytes) {
            return Err(GardenError::Decode(
                "Truncated JPEG: missing end-of-image marker".to_string(),
            ));
        }

        let image = image::load_from_memory_with_format(bytes, format)?;
        Self::validate_dimensions(&image)?;

        Ok(image)
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 数据以 FF D9 结尾，允许尾部补零
    pub fn has_jpeg_end_marker(bytes: &[u8]) -> bool {
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        bytes[..end].ends_with(&JPEG_EOI)
    }

    /// 验证图像格式是否支持
    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::WebP
        )
    }

    /// 验证图像尺寸
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width == 0 || height == 0 {
            return Err(GardenError::Decode(format!("Image has no pixels: {}x{}", width, height)));
        }

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(GardenError::Decode(format!(
                "Image too large: {}x{}, maximum {}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(())
    }
}
