// Copyright 2023 The Arbors Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Advisory file locking for store commits. The lock is a sibling file
//! created with `O_EXCL`; holding the struct holds the lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    /// Acquires the lock, retrying with growing sleeps for up to ten
    /// seconds before giving up with the underlying error.
    pub fn lock(path: PathBuf) -> Result<FileLock, io::Error> {
        let mut options = OpenOptions::new();
        options.create_new(true);
        options.write(true);
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut backoff = Duration::from_millis(1);
        loop {
            match options.open(&path) {
                Ok(file) => {
                    return Ok(FileLock { path, _file: file });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(err);
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_millis(100));
                }
                Err(err) => {
                    return Err(err);
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Failing to delete the lock file means a stale lock, which the
        // next locker will wait out; there is nothing useful to do here.
        std::fs::remove_file(&self.path).ok();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_lock_basic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join("test.lock");
        assert!(!lock_path.exists());
        {
            let _lock = FileLock::lock(lock_path.clone()).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_lock_concurrent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_path = temp_dir.path().join("counter");
        let lock_path = temp_dir.path().join("counter.lock");
        std::fs::write(&data_path, 0_u32.to_le_bytes()).unwrap();
        let mut threads = vec![];
        for _ in 0..10 {
            let data_path = data_path.clone();
            let lock_path = lock_path.clone();
            threads.push(thread::spawn(move || {
                let _lock = FileLock::lock(lock_path).unwrap();
                let bytes = std::fs::read(&data_path).unwrap();
                let value = u32::from_le_bytes(bytes.try_into().unwrap());
                thread::sleep(Duration::from_millis(1));
                std::fs::write(&data_path, (value + 1).to_le_bytes()).unwrap();
            }));
        }
        for handle in threads {
            handle.join().unwrap();
        }
        let bytes = std::fs::read(&data_path).unwrap();
        assert_eq!(u32::from_le_bytes(bytes.try_into().unwrap()), 10);
    }
}
