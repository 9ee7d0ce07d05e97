use std::path::PathBuf;

use directories::ProjectDirs;

use crate::config::DEFAULT_STORE_FILE;
use crate::error::StoreError;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "lockbox";
pub const APP_NAME: &str = "lockbox";

pub fn data_dir() -> Result<PathBuf, StoreError> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        StoreError::Persistence(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cannot determine data directory",
        ))
    })?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn default_store_path() -> Result<PathBuf, StoreError> {
    Ok(data_dir()?.join(DEFAULT_STORE_FILE))
}
