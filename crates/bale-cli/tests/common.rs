#![allow(dead_code)]

use std::{fs, path::Path};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd, Command};
use serde_json::Value;
use tempfile::TempDir;

/// Storage root plus a source tree to archive.
pub struct Fixture {
    pub temp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::Builder::new()
            .prefix("bale-cli")
            .tempdir()
            .expect("tempdir");
        fs::create_dir_all(temp.path().join("storage")).expect("storage dir");
        Self { temp }
    }

    pub fn storage(&self) -> std::path::PathBuf {
        self.temp.path().join("storage")
    }

    pub fn write(&self, rel: &str, contents: &str) -> std::path::PathBuf {
        let path = self.temp.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// `bale` bound to this fixture's storage root.
    pub fn bale(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("bale");
        cmd.env("STORAGE_PATH", self.storage())
            .env("STORAGE_ADDRESS", "localhost:9090")
            .env_remove("STORAGE_ADV_ADDR")
            .env("NO_COLOR", "1");
        cmd
    }
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
