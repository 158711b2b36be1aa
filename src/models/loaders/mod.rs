pub mod json_loader;
pub mod scan_loader;

pub use json_loader::load_answer_key;
pub use scan_loader::{load_all_scan_folders, load_scan_folder, ScanFolder};
