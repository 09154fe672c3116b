// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::fs;
use std::io;
use std::path::PathBuf;

use mtline_tl::deserialize::Error as TlError;
use mtline_tl::{Cursor, Deserializable, Serializable};

/// The fields of a session that survive restarts.
///
/// The server salt and time offset change while a connection is active
/// (the server rotates the former and corrects the latter), so they are
/// written out together with the identifiers they belong to.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub session_id: i64,
    pub salt: i64,
    pub time_offset: i32,
    pub auth_key: [u8; 256],
}

impl Snapshot {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.session_id.serialize(buf);
        self.salt.serialize(buf);
        self.time_offset.serialize(buf);
        buf.extend(self.auth_key);
    }

    fn deserialize(cursor: &mut Cursor) -> Result<Self, TlError> {
        let session_id = i64::deserialize(cursor)?;
        let salt = i64::deserialize(cursor)?;
        let time_offset = i32::deserialize(cursor)?;
        let mut auth_key = [0u8; 256];
        cursor.read_exact(&mut auth_key)?;
        Ok(Self {
            session_id,
            salt,
            time_offset,
            auth_key,
        })
    }
}

/// The trait used by session storage implementations.
///
/// The sender persists the session after every send and after server
/// corrections, so implementations should be cheap to call repeatedly.
pub trait SessionStorage: Send {
    /// Persist the given snapshot.
    fn save(&mut self, snapshot: &Snapshot) -> io::Result<()>;

    /// Return the previously persisted snapshot, if any.
    fn load(&mut self) -> io::Result<Option<Snapshot>>;
}

/// A basic storage implementation, kept only in-memory.
///
/// Useful for tests and throwaway sessions where losing the salt and
/// time offset on restart is acceptable.
#[derive(Default)]
pub struct MemoryStorage {
    snapshot: Option<Snapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn save(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        self.snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&mut self) -> io::Result<Option<Snapshot>> {
        Ok(self.snapshot.clone())
    }
}

/// Stores the session snapshot in a single binary file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStorage for FileStorage {
    fn save(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        let mut buffer = Vec::new();
        snapshot.serialize(&mut buffer);
        fs::write(&self.path, buffer)
    }

    fn load(&mut self) -> io::Result<Option<Snapshot>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        Snapshot::deserialize(&mut Cursor::from_slice(&data))
            .map(Some)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed session file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_snapshot() -> Snapshot {
        Snapshot {
            session_id: 0x0123456789abcdef,
            salt: -12345,
            time_offset: -3,
            auth_key: [7; 256],
        }
    }

    #[test]
    fn memory_round_trips() {
        let mut storage = MemoryStorage::new();
        assert_eq!(storage.load().unwrap(), None);

        let snapshot = get_test_snapshot();
        storage.save(&snapshot).unwrap();
        assert_eq!(storage.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn file_round_trips() {
        let path = std::env::temp_dir().join("mtline-session-test.bin");
        let _ = fs::remove_file(&path);

        let mut storage = FileStorage::new(&path);
        assert_eq!(storage.load().unwrap(), None);

        let snapshot = get_test_snapshot();
        storage.save(&snapshot).unwrap();
        assert_eq!(storage.load().unwrap(), Some(snapshot));

        let _ = fs::remove_file(&path);
    }
}
