// Copyright 2026 - developers of the `mtline` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The state a client shares with the server across a connection: the
//! authorization key, the server salt, and the counters every outgoing
//! message draws its identifier and sequence number from.
mod storage;

pub use storage::{FileStorage, MemoryStorage, SessionStorage, Snapshot};

use getrandom::getrandom;
use log::debug;
use mtline_crypto::AuthKey;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

/// A builder to configure [`Session`] instances.
///
/// Use the [`Session::build`] method to create builder instances.
pub struct Builder {
    first_salt: i64,
    time_offset: i32,
    report_errors: bool,
    storage: Option<Box<dyn SessionStorage>>,
}

/// The mutable state of a client session.
///
/// A session outlives any single transport connection: its identifier is
/// generated once, and the salt and time offset are corrected by the
/// server over time. Those corrections are persisted through the
/// configured [`SessionStorage`] so they survive restarts.
pub struct Session {
    /// The secure, random identifier for this session.
    id: i64,

    /// The authorization key negotiated during the handshake.
    auth_key: AuthKey,

    /// The current salt, rotated by the server at will.
    salt: i64,

    /// The time offset from the server's time, in seconds.
    time_offset: i32,

    /// The ID of the last message, to keep identifiers strictly
    /// increasing even when the clock reads the same instant twice.
    last_msg_id: i64,

    /// The current message sequence number.
    sequence: i32,

    /// Whether RPC errors should be annotated with the constructor of
    /// the request that triggered them.
    report_errors: bool,

    storage: Box<dyn SessionStorage>,
}

impl Builder {
    /// Configures the salt to use before the server announces one.
    pub fn first_salt(mut self, salt: i64) -> Self {
        self.first_salt = salt;
        self
    }

    /// Configures the time offset to the server, in seconds.
    pub fn time_offset(mut self, offset: i32) -> Self {
        self.time_offset = offset;
        self
    }

    /// Configures whether RPC errors carry the constructor that caused
    /// them. Enabled by default.
    pub fn report_errors(mut self, report_errors: bool) -> Self {
        self.report_errors = report_errors;
        self
    }

    /// Configures where the session is persisted. In-memory by default.
    pub fn storage(mut self, storage: Box<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Finishes the builder and returns a fresh `Session` using the
    /// given authorization key, with a newly generated identifier.
    pub fn finish(self, auth_key: [u8; 256]) -> Session {
        Session {
            id: generate_session_id(),
            auth_key: AuthKey::from_bytes(auth_key),
            salt: self.first_salt,
            time_offset: self.time_offset,
            last_msg_id: 0,
            sequence: 0,
            report_errors: self.report_errors,
            storage: self
                .storage
                .unwrap_or_else(|| Box::new(MemoryStorage::new())),
        }
    }
}

fn generate_session_id() -> i64 {
    let mut buffer = [0u8; 8];
    getrandom(&mut buffer).expect("failed to generate a secure session id");
    i64::from_le_bytes(buffer)
}

impl Session {
    /// Start building a new session.
    pub fn build() -> Builder {
        Builder {
            first_salt: 0,
            time_offset: 0,
            report_errors: true,
            storage: None,
        }
    }

    /// Load a previously persisted session from the given storage.
    ///
    /// Returns `Ok(None)` when the storage holds no snapshot yet.
    pub fn restore(mut storage: Box<dyn SessionStorage>) -> io::Result<Option<Self>> {
        let snapshot = match storage.load()? {
            Some(snapshot) => snapshot,
            None => return Ok(None),
        };

        Ok(Some(Session {
            id: snapshot.session_id,
            auth_key: AuthKey::from_bytes(snapshot.auth_key),
            salt: snapshot.salt,
            time_offset: snapshot.time_offset,
            last_msg_id: 0,
            sequence: 0,
            report_errors: true,
            storage,
        }))
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn auth_key(&self) -> &AuthKey {
        &self.auth_key
    }

    pub fn salt(&self) -> i64 {
        self.salt
    }

    /// Adopt a salt announced by the server.
    pub fn set_salt(&mut self, salt: i64) {
        self.salt = salt;
    }

    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    pub fn report_errors(&self) -> bool {
        self.report_errors
    }

    /// Generates a new unique message ID based on the current time since
    /// epoch, applying the known time offset.
    ///
    /// Identifiers are strictly increasing and have their two lower bits
    /// clear, as the server expects from a client.
    pub fn get_new_msg_id(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");

        let seconds = (now.as_secs() as i64 + self.time_offset as i64) as u64;
        let nanoseconds = now.subsec_nanos() as u64;
        let mut new_msg_id = ((seconds << 32) | (nanoseconds << 2)) as i64;

        if self.last_msg_id >= new_msg_id {
            new_msg_id = self.last_msg_id + 4;
        }

        self.last_msg_id = new_msg_id;
        new_msg_id
    }

    /// Correct the time offset based on a message ID known to carry a
    /// valid server time, and start issuing identifiers from it.
    pub fn update_time_offset(&mut self, correct_msg_id: i64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch")
            .as_secs() as i32;

        let correct = (correct_msg_id >> 32) as i32;
        self.time_offset = correct - now;
        self.last_msg_id = 0;
        debug!("corrected time offset to {}s", self.time_offset);
    }

    /// Generates the next sequence number depending on whether it is for
    /// a content-related message or not.
    pub fn generate_sequence(&mut self, content_related: bool) -> i32 {
        if content_related {
            self.sequence += 2;
            self.sequence - 1
        } else {
            self.sequence
        }
    }

    /// Persist the session through the configured storage, so salt and
    /// time-offset corrections survive a restart.
    pub fn save(&mut self) -> io::Result<()> {
        let snapshot = Snapshot {
            session_id: self.id,
            salt: self.salt,
            time_offset: self.time_offset,
            auth_key: self.auth_key.to_bytes(),
        };
        self.storage.save(&snapshot)
    }
}
