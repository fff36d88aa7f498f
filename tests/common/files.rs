/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    fs,
    path::PathBuf,
    process,
    time::{SystemTime, UNIX_EPOCH},
};

/// A fresh directory under the system's temporary directory, removed when dropped.
pub(crate) struct TestDir(PathBuf);

impl TestDir {
    pub(crate) fn new(name: &str) -> TestDir {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        let dir = std::env::temp_dir().join(format!("quorum_rs_it_{}_{}_{}", name, process::id(), nanos));
        fs::create_dir_all(&dir).unwrap();
        TestDir(dir)
    }

    /// A file prefix inside the directory, for one participant or engine.
    pub(crate) fn prefix(&self, owner: &str) -> String {
        format!("{}/{}.", self.0.display(), owner)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}
