//! Binary layout of the persisted session file
//!
//! ```text
//! "PAIRLINK" | version u32 LE | flags u8 | [public 32 | secret 32]
//! name_len u8 | name | count u16 LE | count * (public 32 | tx 32 | rx 32)
//! ```
//!
//! Anything after the last record is ignored so a padded legacy image parses.

use bytes::{Buf, BufMut};

use super::{ClientSessionRecord, IdentityRecord, SavedSessions, StorageError};

/// File magic
pub const MAGIC: &[u8; 8] = b"PAIRLINK";

/// Current format version
pub const FORMAT_VERSION: u32 = 2;

/// Longest robot name the format stores
pub const MAX_NAME_LEN: usize = 64;

const FLAG_IDENTITY: u8 = 0b0000_0001;
const KEY_LEN: usize = 32;
const RECORD_LEN: usize = 3 * KEY_LEN;

pub(crate) fn encode(sessions: &SavedSessions) -> Result<Vec<u8>, StorageError> {
    let name = sessions.name.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(StorageError::NameTooLong(name.len()));
    }
    let count = u16::try_from(sessions.clients.len())
        .map_err(|_| StorageError::TooManyClients(sessions.clients.len()))?;

    let mut out = Vec::with_capacity(
        MAGIC.len() + 4 + 1 + 2 * KEY_LEN + 1 + name.len() + 2 + sessions.clients.len() * RECORD_LEN,
    );
    out.put_slice(MAGIC);
    out.put_u32_le(FORMAT_VERSION);

    match &sessions.identity {
        Some(identity) => {
            out.put_u8(FLAG_IDENTITY);
            out.put_slice(&identity.public_key);
            out.put_slice(&identity.secret_key);
        }
        None => out.put_u8(0),
    }

    // Bounded by MAX_NAME_LEN above
    #[allow(clippy::cast_possible_truncation)]
    out.put_u8(name.len() as u8);
    out.put_slice(name);

    out.put_u16_le(count);
    for record in &sessions.clients {
        out.put_slice(&record.public_key);
        out.put_slice(&record.encrypt_key);
        out.put_slice(&record.decrypt_key);
    }
    Ok(out)
}

pub(crate) fn decode(mut data: &[u8]) -> Result<SavedSessions, StorageError> {
    if data.remaining() < MAGIC.len() + 4 + 1 || &data[..MAGIC.len()] != MAGIC {
        return Err(StorageError::Corrupt("bad magic"));
    }
    data.advance(MAGIC.len());

    let version = data.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }

    let flags = data.get_u8();
    let identity = if flags & FLAG_IDENTITY == 0 {
        None
    } else {
        if data.remaining() < 2 * KEY_LEN {
            return Err(StorageError::Corrupt("truncated identity"));
        }
        Some(IdentityRecord {
            public_key: take_key(&mut data),
            secret_key: take_key(&mut data),
        })
    };

    if !data.has_remaining() {
        return Err(StorageError::Corrupt("missing name"));
    }
    let name_len = usize::from(data.get_u8());
    if name_len > MAX_NAME_LEN || data.remaining() < name_len {
        return Err(StorageError::Corrupt("bad name length"));
    }
    let name = std::str::from_utf8(&data[..name_len])
        .map_err(|_| StorageError::Corrupt("name is not UTF-8"))?
        .to_string();
    data.advance(name_len);

    if data.remaining() < 2 {
        return Err(StorageError::Corrupt("missing record count"));
    }
    let count = usize::from(data.get_u16_le());
    if data.remaining() < count * RECORD_LEN {
        return Err(StorageError::Corrupt("truncated records"));
    }

    let clients = (0..count)
        .map(|_| ClientSessionRecord {
            public_key: take_key(&mut data),
            encrypt_key: take_key(&mut data),
            decrypt_key: take_key(&mut data),
        })
        .collect();

    Ok(SavedSessions {
        identity,
        name,
        clients,
    })
}

fn take_key(data: &mut &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    data.copy_to_slice(&mut key);
    key
}
