//! 多页拼图 - 基础设施层
//!
//! 把若干页扫描件拼成一张图，作为一次 OCR 请求的输入。
//! 除读取输入图片外没有任何文件系统副作用。

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, Rgb, RgbImage};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::InputError;
use crate::infrastructure::label::{draw_label, label_scale};

/// 单元高宽比（近似 A4 纵向）
pub const TILE_ASPECT: f32 = 1.4;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GUTTER_GRAY: Rgb<u8> = Rgb([200, 200, 200]);

/// 拼图参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollageOptions {
    pub tile_width: u32,
    /// 单元之间及四周的间隔
    pub gutter: u32,
    pub jpeg_quality: u8,
}

impl Default for CollageOptions {
    fn default() -> Self {
        Self {
            tile_width: 800,
            gutter: 20,
            jpeg_quality: 90,
        }
    }
}

impl CollageOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tile_width: config.tile_width,
            gutter: config.collage_gutter,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// 编码后的拼图
#[derive(Debug, Clone)]
pub struct EncodedCollage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub page_count: usize,
}

impl EncodedCollage {
    pub fn to_base64(&self) -> String {
        encode_base64(&self.bytes)
    }
}

pub fn tile_height(tile_width: u32) -> u32 {
    (tile_width as f32 * TILE_ASPECT).round() as u32
}

/// 基础拼图的网格 (列, 行)：两者均为 ceil(sqrt(n))
pub fn grid_dimensions(n: usize) -> (u32, u32) {
    let mut side = 0usize;
    while side * side < n {
        side += 1;
    }
    (side as u32, side as u32)
}

/// 智能拼图的网格 (列, 行)
pub fn smart_grid_layout(n: usize) -> (u32, u32) {
    match n {
        0 | 1 => (1, 1),
        2 => (2, 1),
        3 | 4 => (2, 2),
        5 | 6 => (3, 2),
        7..=9 => (3, 3),
        _ => (3, n.div_ceil(3) as u32),
    }
}

fn check_tile_width(tile_width: u32) -> Result<(), InputError> {
    if tile_width == 0 {
        return Err(InputError::InvalidTileWidth { width: tile_width });
    }
    Ok(())
}

/// 读取图片；缺失或无法解码的文件被丢弃
pub fn load_images<P: AsRef<Path>>(paths: &[P]) -> Vec<DynamicImage> {
    paths
        .iter()
        .filter_map(|path| {
            let path = path.as_ref();
            match image::open(path) {
                Ok(img) => Some(img),
                Err(e) => {
                    warn!("跳过无法读取的图片 {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}

/// 基础拼图：每页拉伸到 (w, 1.4w)，按行优先排列，空位补白
pub fn build_collage<P: AsRef<Path>>(paths: &[P], tile_width: u32) -> Result<RgbImage, InputError> {
    check_tile_width(tile_width)?;
    build_collage_from_images(&load_images(paths), tile_width)
}

pub fn build_collage_from_images(
    images: &[DynamicImage],
    tile_width: u32,
) -> Result<RgbImage, InputError> {
    check_tile_width(tile_width)?;
    if images.is_empty() {
        return Err(InputError::EmptyInput);
    }

    let (cols, rows) = grid_dimensions(images.len());
    let tile_h = tile_height(tile_width);
    let mut canvas = RgbImage::from_pixel(cols * tile_width, rows * tile_h, WHITE);

    for (index, img) in images.iter().enumerate() {
        let index = index as u32;
        let tile = imageops::resize(&img.to_rgb8(), tile_width, tile_h, FilterType::Triangle);
        let x = (index % cols) * tile_width;
        let y = (index / cols) * tile_h;
        imageops::replace(&mut canvas, &tile, i64::from(x), i64::from(y));
    }

    debug!(
        "拼图完成: {} 页, {}x{} 网格, 填充 {} 个空位",
        images.len(),
        cols,
        rows,
        (cols * rows) as usize - images.len()
    );
    Ok(canvas)
}

/// 保持比例缩放后居中放入白色纸张单元
fn letterbox(img: &DynamicImage, slot_w: u32, slot_h: u32) -> RgbImage {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut slot = RgbImage::from_pixel(slot_w, slot_h, WHITE);
    if w == 0 || h == 0 {
        return slot;
    }

    let ratio = (slot_w as f32 / w as f32).min(slot_h as f32 / h as f32);
    let fit_w = ((w as f32 * ratio).round() as u32).clamp(1, slot_w);
    let fit_h = ((h as f32 * ratio).round() as u32).clamp(1, slot_h);
    let resized = imageops::resize(&rgb, fit_w, fit_h, FilterType::CatmullRom);

    let offset_x = (slot_w - fit_w) / 2;
    let offset_y = (slot_h - fit_h) / 2;
    imageops::replace(&mut slot, &resized, i64::from(offset_x), i64::from(offset_y));
    slot
}

/// 智能拼图：保持比例、左上角标注 `PAGE_<n>`、单元间留灰色间隔
pub fn build_smart_collage<P: AsRef<Path>>(
    paths: &[P],
    options: &CollageOptions,
) -> Result<RgbImage, InputError> {
    check_tile_width(options.tile_width)?;
    build_smart_collage_from_images(&load_images(paths), options)
}

pub fn build_smart_collage_from_images(
    images: &[DynamicImage],
    options: &CollageOptions,
) -> Result<RgbImage, InputError> {
    check_tile_width(options.tile_width)?;
    if images.is_empty() {
        return Err(InputError::EmptyInput);
    }

    let (cols, rows) = smart_grid_layout(images.len());
    let slot_w = options.tile_width;
    let slot_h = tile_height(slot_w);
    let gutter = options.gutter;

    let width = cols * slot_w + (cols + 1) * gutter;
    let height = rows * slot_h + (rows + 1) * gutter;
    let mut canvas = RgbImage::from_pixel(width, height, GUTTER_GRAY);

    let scale = label_scale(slot_w);
    let margin = 2 * scale;

    for slot_index in 0..cols * rows {
        let x = gutter + (slot_index % cols) * (slot_w + gutter);
        let y = gutter + (slot_index / cols) * (slot_h + gutter);

        let slot = match images.get(slot_index as usize) {
            Some(img) => {
                let mut slot = letterbox(img, slot_w, slot_h);
                draw_label(&mut slot, &format!("PAGE_{}", slot_index + 1), margin, margin, scale);
                slot
            }
            None => RgbImage::from_pixel(slot_w, slot_h, WHITE),
        };
        imageops::replace(&mut canvas, &slot, i64::from(x), i64::from(y));
    }

    debug!(
        "智能拼图完成: {} 页, {}x{} 网格, 画布 {}x{}",
        images.len(),
        cols,
        rows,
        width,
        height
    );
    Ok(canvas)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, InputError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    Ok(bytes)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// 读取页面、拼图并编码为 JPEG（CPU 密集，调用方应放到阻塞线程）
pub fn prepare_ocr_image<P: AsRef<Path>>(
    paths: &[P],
    options: &CollageOptions,
) -> Result<EncodedCollage, InputError> {
    check_tile_width(options.tile_width)?;
    let images = load_images(paths);
    let collage = build_smart_collage_from_images(&images, options)?;
    let bytes = encode_jpeg(&collage, options.jpeg_quality)?;
    debug!("拼图编码完成: {} 字节", bytes.len());

    Ok(EncodedCollage {
        bytes,
        mime_type: "image/jpeg",
        page_count: images.len(),
    })
}
