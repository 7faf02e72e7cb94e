use crate::models::TensorLayout;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// 模型输入使用的重采样算法：最近邻，与训练时 Keras `load_img` 的默认行为一致
pub const RESIZE_FILTER: FilterType = FilterType::Nearest;

/// 图像变换工具集
pub struct ImageTransforms;

impl ImageTransforms {
    /// 缩放到固定尺寸（不保持宽高比），并转为 RGB
    pub fn resize_exact(image: &DynamicImage, width: u32, height: u32) -> RgbImage {
        if image.width() == width && image.height() == height {
            return image.to_rgb8();
        }
        image.resize_exact(width, height, RESIZE_FILTER).to_rgb8()
    }

    /// 像素除以 255 归一化到 [0,1]，并加上大小为 1 的 batch 维度
    pub fn to_tensor(image: &RgbImage, layout: TensorLayout) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let (h, w) = (height as usize, width as usize);

        let mut tensor = match layout {
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
        };

        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                match layout {
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                }
            }
        }

        tensor
    }
}
