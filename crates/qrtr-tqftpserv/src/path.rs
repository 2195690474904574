// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Virtual path translation (§4.E, `translate.c`): `/readonly/firmware/
//! image/<rest>` resolves against each remoteproc instance's firmware
//! directory, first match wins; `/readwrite/<rest>` resolves under a
//! process-wide scratch directory. Any other prefix is rejected.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const READONLY_PREFIX: &str = "/readonly/firmware/image/";
const READWRITE_PREFIX: &str = "/readwrite/";

/// Where `translate_open` looks for remoteproc-owned firmware, overridable
/// in tests; production default matches `translate.c`'s non-Android path.
pub struct Translator {
    remoteproc_class_dir: PathBuf,
    firmware_base: PathBuf,
    scratch_dir: PathBuf,
}

impl Translator {
    pub fn new(remoteproc_class_dir: impl Into<PathBuf>, firmware_base: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            remoteproc_class_dir: remoteproc_class_dir.into(),
            firmware_base: firmware_base.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn production() -> Self {
        Self::new("/sys/class/remoteproc", "/lib/firmware", "/tmp/tqftpserv")
    }

    /// Scan each remoteproc instance's `firmware` sysfs attribute for the
    /// directory its image lives in, and try `<firmware_base>/<dirname>/
    /// <rest>` in turn. First existing file wins.
    fn open_readonly(&self, rest: &str) -> io::Result<File> {
        let entries = fs::read_dir(&self.remoteproc_class_dir)?;
        for entry in entries.flatten() {
            let firmware_attr = entry.path().join("firmware");
            let Ok(firmware_value) = fs::read_to_string(&firmware_attr) else {
                continue;
            };
            let firmware_value = firmware_value.trim();
            let dir = Path::new(firmware_value).parent().unwrap_or_else(|| Path::new(""));
            let candidate = self.firmware_base.join(dir).join(rest);
            match File::open(&candidate) {
                Ok(f) => return Ok(f),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(io::ErrorKind::NotFound, "no remoteproc firmware dir contained the file"))
    }

    /// Open (creating if requested) `rest` under the scratch directory,
    /// creating the directory itself on first use.
    fn open_readwrite(&self, rest: &str, create: bool) -> io::Result<File> {
        fs::create_dir_all(&self.scratch_dir)?;
        let path = self.scratch_dir.join(rest);
        let mut opts = OpenOptions::new();
        opts.read(true).write(create).create(create);
        if !create {
            opts.write(false);
        }
        opts.open(path)
    }

    /// `create` selects write+create (WRQ) vs read-only (RRQ) for the
    /// read-write branch; the read-only branch is always `O_RDONLY`.
    pub fn open(&self, virtual_path: &str, create: bool) -> io::Result<File> {
        if let Some(rest) = virtual_path.strip_prefix(READONLY_PREFIX) {
            self.open_readonly(rest)
        } else if let Some(rest) = virtual_path.strip_prefix(READWRITE_PREFIX) {
            self.open_readwrite(rest, create)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, format!("invalid path {virtual_path}, rejecting")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn readonly_path_resolves_through_remoteproc_firmware_attr() {
        let root = tempfile::tempdir().unwrap();
        let class_dir = root.path().join("class");
        let firmware_base = root.path().join("firmware");
        let scratch = root.path().join("scratch");

        let rproc0 = class_dir.join("remoteproc0");
        fs::create_dir_all(&rproc0).unwrap();
        fs::write(rproc0.join("firmware"), "qcom/modem.mbn\n").unwrap();

        let image_dir = firmware_base.join("qcom");
        fs::create_dir_all(&image_dir).unwrap();
        let mut f = File::create(image_dir.join("modem.mbn")).unwrap();
        f.write_all(b"firmware bytes").unwrap();

        let translator = Translator::new(&class_dir, &firmware_base, &scratch);
        let opened = translator.open("/readonly/firmware/image/modem.mbn", false);
        assert!(opened.is_ok());
    }

    #[test]
    fn readonly_path_missing_file_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let class_dir = root.path().join("class");
        fs::create_dir_all(&class_dir).unwrap();
        let translator = Translator::new(&class_dir, root.path().join("firmware"), root.path().join("scratch"));
        let result = translator.open("/readonly/firmware/image/nope.mbn", false);
        assert!(result.is_err());
    }

    #[test]
    fn readwrite_path_creates_scratch_dir_and_file() {
        let root = tempfile::tempdir().unwrap();
        let translator = Translator::new(root.path().join("class"), root.path().join("firmware"), root.path().join("scratch"));
        let opened = translator.open("/readwrite/upload.bin", true);
        assert!(opened.is_ok());
        assert!(root.path().join("scratch").join("upload.bin").exists());
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let translator = Translator::new(root.path().join("class"), root.path().join("firmware"), root.path().join("scratch"));
        let result = translator.open("/etc/shadow", false);
        assert!(result.is_err());
    }
}
