//! 基础设施层
//!
//! - `collage` - 多页拼图与 JPEG 编码
//! - `label` - 页码标签点阵字形
//! - `store` - 答案与成绩的 JSON 文件存储

pub mod collage;
pub mod label;
pub mod store;

pub use collage::{
    build_collage, build_collage_from_images, build_smart_collage, build_smart_collage_from_images,
    encode_base64, encode_jpeg, grid_dimensions, prepare_ocr_image, smart_grid_layout,
    CollageOptions, EncodedCollage,
};
pub use store::{AnswerKeyStore, JsonFileStore, PersistOutcome, ResultStore};
