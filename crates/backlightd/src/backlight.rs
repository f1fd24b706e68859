//! Access to the hardware backlight control file.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("failed to read backlight file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to write backlight file {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("invalid brightness value {value:?} in {path}")]
    Parse { path: PathBuf, value: String },
}

/// Read/write access to the raw brightness value.
///
/// Implementations perform blocking I/O on every call; async callers run them
/// on the blocking thread pool.
pub trait BrightnessPort: Send + Sync {
    fn write_brightness(&self, value: i64) -> Result<(), HardwareError>;

    fn read_brightness(&self) -> Result<i64, HardwareError>;
}

/// Backlight exposed as a single decimal integer in a sysfs-style file.
#[derive(Debug, Clone)]
pub struct SysfsBacklight {
    path: PathBuf,
}

impl SysfsBacklight {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BrightnessPort for SysfsBacklight {
    fn write_brightness(&self, value: i64) -> Result<(), HardwareError> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }

        let mut file = options
            .open(&self.path)
            .map_err(|e| HardwareError::Write(self.path.clone(), e))?;
        file.write_all(value.to_string().as_bytes())
            .map_err(|e| HardwareError::Write(self.path.clone(), e))
    }

    fn read_brightness(&self) -> Result<i64, HardwareError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| HardwareError::Read(self.path.clone(), e))?;

        let trimmed = contents.trim();
        trimmed.parse().map_err(|_| HardwareError::Parse {
            path: self.path.clone(),
            value: trimmed.to_string(),
        })
    }
}

/// In-memory backlight for tests. Clones share state.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MockBacklight {
    inner: std::sync::Arc<std::sync::Mutex<MockBacklightState>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockBacklightState {
    /// Current value; `None` makes reads fail as if the file were missing.
    pub value: Option<i64>,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub writes: Vec<i64>,
    pub reads: usize,
    /// Writes block the calling thread this long before taking effect.
    pub stall: Option<std::time::Duration>,
}

#[cfg(test)]
impl MockBacklight {
    pub fn with_value(value: i64) -> Self {
        let mock = Self::default();
        mock.state().value = Some(value);
        mock
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockBacklightState> {
        self.inner.lock().unwrap()
    }

    fn io_error(kind: std::io::ErrorKind) -> std::io::Error {
        std::io::Error::new(kind, "mock backlight failure")
    }
}

#[cfg(test)]
impl BrightnessPort for MockBacklight {
    fn write_brightness(&self, value: i64) -> Result<(), HardwareError> {
        let stall = self.state().stall;
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }

        let mut state = self.state();
        if state.fail_writes {
            return Err(HardwareError::Write(
                PathBuf::from("mock"),
                Self::io_error(std::io::ErrorKind::PermissionDenied),
            ));
        }
        state.writes.push(value);
        state.value = Some(value);
        Ok(())
    }

    fn read_brightness(&self) -> Result<i64, HardwareError> {
        let mut state = self.state();
        state.reads += 1;
        match state.value {
            Some(value) if !state.fail_reads => Ok(value),
            _ => Err(HardwareError::Read(
                PathBuf::from("mock"),
                Self::io_error(std::io::ErrorKind::NotFound),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_trims_whitespace() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("brightness");
        fs::write(&path, "  9700\n").unwrap();

        let backlight = SysfsBacklight::new(&path);
        assert_eq!(backlight.read_brightness().unwrap(), 9700);
    }

    #[test]
    fn test_write_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("brightness");
        fs::write(&path, "1234567890\n").unwrap();

        let backlight = SysfsBacklight::new(&path);
        backlight.write_brightness(9950).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "9950");
        assert_eq!(backlight.read_brightness().unwrap(), 9950);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_creates_file_with_owner_write_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("brightness");

        SysfsBacklight::new(&path).write_brightness(0).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        // The process umask can only clear bits.
        assert_eq!(mode & !0o644, 0);
        assert_ne!(mode & 0o200, 0);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("brightness");
        fs::write(&path, "bright\n").unwrap();

        let err = SysfsBacklight::new(&path).read_brightness().unwrap_err();
        match err {
            HardwareError::Parse { value, .. } => assert_eq!(value, "bright"),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_path_errors() {
        let backlight = SysfsBacklight::new("/nonexistent/backlight/brightness");

        assert!(matches!(
            backlight.read_brightness(),
            Err(HardwareError::Read(..))
        ));
        assert!(matches!(
            backlight.write_brightness(10),
            Err(HardwareError::Write(..))
        ));
    }
}
