use super::file_size::{FileSizeUtils, DEFAULT_SPEED_MBPS};
use std::path::Path;

pub const SUPPORTED_EXTENSIONS: [&str; 15] = [
    "zip", "obj", "fbx", "3ds", "dae", "ply", "stl", "jpg", "png", "tga", "bmp", "jpeg", "tiff",
    "stp", "blend",
];

/// Files above this size are rejected.
pub const MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;
/// Files above this size upload with a warning.
pub const WARN_FILE_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub extension: String,
}

impl FileInfo {
    pub fn new(name: &str, size: u64) -> Self {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            size,
            extension,
        }
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn is_zip(&self) -> bool {
        self.extension == "zip"
    }

    pub fn formatted_size(&self) -> String {
        FileSizeUtils::format_size(self.size)
    }

    pub fn estimated_upload_time(&self) -> String {
        FileSizeUtils::estimate_upload_time(self.size, DEFAULT_SPEED_MBPS)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("file name is empty".to_string());
        }
        if !self.is_supported() {
            return Err(format!(
                "unsupported file type '.{}'; expected one of: {}",
                self.extension,
                SUPPORTED_EXTENSIONS.join(", ")
            ));
        }
        if self.size == 0 {
            return Err(format!("{} is empty", self.name));
        }
        if self.size > MAX_FILE_SIZE {
            return Err(format!(
                "{} is {}, above the {} limit",
                self.name,
                self.formatted_size(),
                FileSizeUtils::format_size(MAX_FILE_SIZE)
            ));
        }
        Ok(())
    }

    pub fn size_warning(&self) -> Option<String> {
        (self.size > WARN_FILE_SIZE).then(|| {
            format!(
                "Large file ({}); upload may take {}",
                self.formatted_size(),
                self.estimated_upload_time()
            )
        })
    }
}
