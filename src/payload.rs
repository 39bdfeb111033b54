//! Payloads and the transfer job they are queued in.
//!
//! A [`TransferJob`] keeps two ordered lists, one per [`PayloadClass`]. The send
//! order is the insertion order within a class, and all firmware payloads are
//! always sent before any resource payload.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::{Error, Result};

// =============================================================================
// Public Interface
// =============================================================================

/// The kind of data carried by a payload. Selects the framing markers and the
/// chunk size used to push it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PayloadClass {
    Firmware,
    Resource,
}
impl fmt::Display for PayloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadClass::Firmware => write!(f, "firmware"),
            PayloadClass::Resource => write!(f, "resource"),
        }
    }
}

/// One file queued for transfer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Payload {
    path: PathBuf,
    name: String,
    size_bytes: u64,
    class: PayloadClass,
}
impl Payload {
    /// Describe the file at `path`, capturing its current length.
    pub fn from_path(path: impl AsRef<Path>, class: PayloadClass) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
            _ => Error::io(format!("stat `{}`", path.display()), e),
        })?;
        if !metadata.is_file() {
            return Err(Error::io(
                format!("stat `{}`", path.display()),
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Payload {
            path: path.to_path_buf(),
            name,
            size_bytes: metadata.len(),
            class,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file name, for display.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The length of the file when it was added.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn class(&self) -> PayloadClass {
        self.class
    }
}
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.class,
            self.name,
            format_size(self.size_bytes)
        )
    }
}

/// An ordered set of payloads pushed in one session.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TransferJob {
    firmware: Vec<Payload>,
    resources: Vec<Payload>,
}
impl TransferJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the file at `path`. A path can only be queued once, whatever its
    /// class; on error the job is left untouched.
    pub fn add(&mut self, path: impl AsRef<Path>, class: PayloadClass) -> Result<&Payload> {
        let path = path.as_ref();
        if self.contains(path) {
            return Err(Error::DuplicatePath(path.to_path_buf()));
        }
        let payload = Payload::from_path(path, class)?;
        debug!("Queued {}", payload);

        let list = self.list_mut(class);
        list.push(payload);
        Ok(&list[list.len() - 1])
    }

    /// Remove the payload with the given path, if any.
    pub fn remove(&mut self, path: impl AsRef<Path>) -> Option<Payload> {
        let path = path.as_ref();
        for list in [&mut self.firmware, &mut self.resources].iter_mut() {
            if let Some(index) = list.iter().position(|p| p.path == path) {
                return Some(list.remove(index));
            }
        }
        None
    }

    /// Remove every payload of a class.
    pub fn clear(&mut self, class: PayloadClass) {
        self.list_mut(class).clear();
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.iter().any(|p| p.path == path)
    }

    pub fn firmware(&self) -> &[Payload] {
        &self.firmware
    }

    pub fn resources(&self) -> &[Payload] {
        &self.resources
    }

    /// Payloads in send order.
    pub fn iter(&self) -> impl Iterator<Item = &Payload> {
        self.firmware.iter().chain(self.resources.iter())
    }

    /// The payload sent in position `index`.
    pub fn get(&self, index: usize) -> Option<&Payload> {
        if index < self.firmware.len() {
            self.firmware.get(index)
        } else {
            self.resources.get(index - self.firmware.len())
        }
    }

    pub fn total_count(&self) -> usize {
        self.firmware.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.iter().map(Payload::size_bytes).sum()
    }

    fn list_mut(&mut self, class: PayloadClass) -> &mut Vec<Payload> {
        match class {
            PayloadClass::Firmware => &mut self.firmware,
            PayloadClass::Resource => &mut self.resources,
        }
    }
}

/// Format a byte count for humans, e.g. `2.4 KB`.
pub fn format_size(size: u64) -> String {
    let mut size = size as f64;
    for unit in ["B", "KB", "MB", "GB"].iter() {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempdir::TempDir;

    fn file(dir: &TempDir, name: &str, len: usize) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(&vec![0xA5; len]).unwrap();
        path
    }

    #[test]
    fn payload_captures_name_and_size() {
        let dir = TempDir::new("payload").unwrap();
        let path = file(&dir, "app.bin", 2500);
        let payload = Payload::from_path(&path, PayloadClass::Firmware).unwrap();
        assert_eq!(payload.name(), "app.bin");
        assert_eq!(payload.size_bytes(), 2500);
        assert_eq!(payload.class(), PayloadClass::Firmware);
        assert_eq!(payload.path(), path.as_path());
        assert_eq!(payload.to_string(), "firmware app.bin (2.4 KB)");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new("payload").unwrap();
        let mut job = TransferJob::new();
        let missing = dir.path().join("missing.bin");
        assert!(matches!(
            job.add(&missing, PayloadClass::Resource),
            Err(Error::NotFound(p)) if p == missing
        ));
        assert!(job.is_empty());
    }

    #[test]
    fn directory_is_rejected() {
        let dir = TempDir::new("payload").unwrap();
        let mut job = TransferJob::new();
        assert!(matches!(
            job.add(dir.path(), PayloadClass::Resource),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn send_order_is_firmware_then_resources() {
        let dir = TempDir::new("job").unwrap();
        let r1 = file(&dir, "r1.dat", 1);
        let f1 = file(&dir, "f1.bin", 1);
        let r2 = file(&dir, "r2.dat", 1);
        let f2 = file(&dir, "f2.bin", 1);

        let mut job = TransferJob::new();
        job.add(&r1, PayloadClass::Resource).unwrap();
        job.add(&f1, PayloadClass::Firmware).unwrap();
        job.add(&r2, PayloadClass::Resource).unwrap();
        job.add(&f2, PayloadClass::Firmware).unwrap();

        let names: Vec<&str> = job.iter().map(Payload::name).collect();
        assert_eq!(names, vec!["f1.bin", "f2.bin", "r1.dat", "r2.dat"]);
        assert_eq!(job.total_count(), 4);
        assert_eq!(job.get(1).unwrap().name(), "f2.bin");
        assert_eq!(job.get(2).unwrap().name(), "r1.dat");
        assert!(job.get(4).is_none());
    }

    #[test]
    fn duplicate_is_rejected_and_job_unchanged() {
        let dir = TempDir::new("job").unwrap();
        let path = file(&dir, "fw.bin", 10);
        let mut job = TransferJob::new();
        job.add(&path, PayloadClass::Firmware).unwrap();
        let before = job.clone();

        assert!(matches!(
            job.add(&path, PayloadClass::Resource),
            Err(Error::DuplicatePath(p)) if p == path
        ));
        assert_eq!(job, before);
    }

    #[test]
    fn remove_and_clear() {
        let dir = TempDir::new("job").unwrap();
        let f = file(&dir, "fw.bin", 3);
        let r1 = file(&dir, "a.dat", 4);
        let r2 = file(&dir, "b.dat", 5);
        let mut job = TransferJob::new();
        job.add(&f, PayloadClass::Firmware).unwrap();
        job.add(&r1, PayloadClass::Resource).unwrap();
        job.add(&r2, PayloadClass::Resource).unwrap();
        assert_eq!(job.total_bytes(), 12);

        assert_eq!(job.remove(&r1).unwrap().name(), "a.dat");
        assert!(job.remove(&r1).is_none());
        assert_eq!(job.resources().len(), 1);

        job.clear(PayloadClass::Firmware);
        assert!(job.firmware().is_empty());
        assert_eq!(job.total_count(), 1);

        // A removed path can be queued again.
        job.add(&r1, PayloadClass::Resource).unwrap();
        assert!(job.contains(&r1));
    }

    #[test]
    fn sizes_for_humans() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1023), "1023.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024 * 1024), "5.0 TB");
    }
}
