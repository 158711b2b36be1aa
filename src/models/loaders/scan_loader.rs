use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 支持的扫描图片扩展名
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 一个扫描文件夹（一张答题卡的全部页面）
#[derive(Debug, Clone)]
pub struct ScanFolder {
    /// 文件夹名，学生模式下即学号
    pub name: String,
    pub path: PathBuf,
    /// 按文件名排序的页面图片
    pub pages: Vec<PathBuf>,
    /// 扫描时间：最新一页的修改时间
    pub captured_at: DateTime<Utc>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 取最新一页的修改时间；无法读取时退回当前时间
async fn capture_time(pages: &[PathBuf]) -> DateTime<Utc> {
    let mut newest = None;
    for page in pages {
        if let Ok(modified) = fs::metadata(page).await.and_then(|m| m.modified()) {
            newest = newest.max(Some(modified));
        }
    }
    newest.map(DateTime::<Utc>::from).unwrap_or_else(|| {
        tracing::debug!("无法读取页面修改时间，使用当前时间");
        Utc::now()
    })
}

/// 读取单个文件夹中的页面图片
pub async fn load_scan_folder(folder_path: &Path) -> Result<ScanFolder> {
    let mut pages = Vec::new();
    let mut entries = fs::read_dir(folder_path)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && is_image(&path) {
            pages.push(path);
        }
    }
    pages.sort();
    let captured_at = capture_time(&pages).await;

    let name = folder_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    Ok(ScanFolder {
        name,
        path: folder_path.to_path_buf(),
        pages,
        captured_at,
    })
}

/// 加载扫描目录下的所有子文件夹
///
/// 没有图片的子文件夹会被跳过
pub async fn load_all_scan_folders(scan_dir: &str) -> Result<Vec<ScanFolder>> {
    let folder = PathBuf::from(scan_dir);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", scan_dir);
    }

    let mut subfolders = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", scan_dir))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            subfolders.push(path);
        }
    }
    subfolders.sort();

    let mut scans = Vec::new();
    for path in subfolders {
        match load_scan_folder(&path).await {
            Ok(scan) if scan.pages.is_empty() => {
                tracing::warn!("文件夹中没有图片，跳过: {}", path.display());
            }
            Ok(scan) => {
                tracing::info!("找到答题卡 {}: {} 页", scan.name, scan.pages.len());
                scans.push(scan);
            }
            Err(e) => {
                tracing::warn!("加载文件夹失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(scans)
}
