//! KDB import

use std::collections::HashMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::header::{HEADER_SIZE, HeaderV3};
use super::*;
use crate::crypto;
use crate::database::entry::{FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME};
use crate::database::{DatabaseConfig, DatabaseV3, EngineState, Entry, Group, NodeId, NodeIcon};
use crate::error::{DatabaseError, Result};
use crate::format::{ProgressSink, Stage, check_cancelled, enter_stage, percent};
use crate::utils::{never_expires, unpack_kdb_date};

/// Decrypt and parse a complete KDB file
pub fn load(
    data: &[u8],
    password: Option<&str>,
    key_file: Option<&[u8]>,
    config: &DatabaseConfig,
    progress: &mut dyn ProgressSink,
) -> Result<DatabaseV3> {
    enter_stage(progress, Stage::HeaderParse)?;
    let header = HeaderV3::read(data)?;

    let mut db = DatabaseV3::new(config);
    db.state = EngineState::Loading;
    db.set_credentials(password, key_file)?;
    db.rounds = header.rounds as u64;

    enter_stage(progress, Stage::KeyDerivation)?;
    let key = final_key(db.master_key()?, &header);

    enter_stage(progress, Stage::BodyDecrypt)?;
    let body = Zeroizing::new(
        crypto::decrypt(&data[HEADER_SIZE..], &key, &header.encryption_iv)
            .map_err(|_| DatabaseError::InvalidCredentials)?,
    );
    if crypto::sha256(&[body.as_slice()]) != header.contents_hash {
        return Err(DatabaseError::InvalidCredentials);
    }

    enter_stage(progress, Stage::BodyParse)?;
    let total = (header.num_groups + header.num_entries) as usize;
    let mut cursor = Cursor::new(body.as_slice());

    let mut groups = Vec::with_capacity(header.num_groups as usize);
    for i in 0..header.num_groups as usize {
        groups.push(read_group(&mut cursor)?);
        progress.update_progress(percent(i + 1, total));
        check_cancelled(progress)?;
    }

    let mut entries = Vec::with_capacity(header.num_entries as usize);
    for i in 0..header.num_entries as usize {
        entries.push(read_entry(&mut cursor, &mut db)?);
        progress.update_progress(percent(groups.len() + i + 1, total));
        check_cancelled(progress)?;
    }

    enter_stage(progress, Stage::TreeConstruct)?;
    construct_tree_from_index(&mut db, groups, entries)?;

    db.state = EngineState::Loaded;
    info!(
        "Loaded KDB database: {} groups, {} entries",
        db.index.group_count(),
        db.index.entry_count()
    );
    Ok(db)
}

/// Link groups read in file order into a tree, then attach entries
///
/// A group at level `L` becomes a child of the most recent group at level
/// `L - 1`; level 0 groups go under the synthetic root. A level more than one
/// deeper than the previous group is corrupt. Each entry is paired with the
/// file id of its group.
pub fn construct_tree_from_index(db: &mut DatabaseV3, groups: Vec<Group>, entries: Vec<(u32, Entry)>) -> Result<()> {
    let root = db.index.root_id();
    let mut file_ids: HashMap<u32, NodeId> = HashMap::new();
    let mut chain: Vec<NodeId> = Vec::new();

    for group in groups {
        let level = group.level as usize;
        if level > chain.len() {
            return Err(DatabaseError::CorruptFormat(format!(
                "group {} at level {} follows a group at level {}",
                group.id,
                level,
                chain.len() as i64 - 1
            )));
        }
        let parent = if level == 0 { root } else { chain[level - 1] };
        let file_id = group.id.as_int().unwrap_or_default();
        let id = db.index.add_group_to(group, &parent)?;
        file_ids.entry(file_id).or_insert(id);
        chain.truncate(level);
        chain.push(id);
    }

    for (group_id, entry) in entries {
        let parent = file_ids.get(&group_id).copied().ok_or_else(|| {
            DatabaseError::CorruptFormat(format!(
                "entry {} references unknown group {}",
                NodeId::Uuid(entry.id),
                group_id
            ))
        })?;
        db.index.add_entry_to(entry, &parent)?;
    }
    debug!("Constructed KDB tree with {} groups", file_ids.len());
    Ok(())
}

/// Next `type / size / data` field
fn next_field<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<(u16, &'a [u8])> {
    let field_type = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    let size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let start = cursor.position() as usize;
    let data = *cursor.get_ref();
    let end = start
        .checked_add(size)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| DatabaseError::CorruptFormat(format!("field 0x{:04x} overruns the body", field_type)))?;
    cursor.set_position(end as u64);
    Ok((field_type, &data[start..end]))
}

fn truncated(_: std::io::Error) -> DatabaseError {
    DatabaseError::CorruptFormat("record is truncated".to_string())
}

fn field_u32(field_type: u16, data: &[u8]) -> Result<u32> {
    data.get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| DatabaseError::CorruptFormat(format!("field 0x{:04x} is too short", field_type)))
}

fn field_u16(field_type: u16, data: &[u8]) -> Result<u16> {
    data.get(..2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or_else(|| DatabaseError::CorruptFormat(format!("field 0x{:04x} is too short", field_type)))
}

/// Null-terminated UTF-8 string
fn field_text(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn field_date(data: &[u8]) -> chrono::DateTime<chrono::Utc> {
    unpack_kdb_date(data).unwrap_or_else(never_expires)
}

fn read_group(cursor: &mut Cursor<&[u8]>) -> Result<Group> {
    let mut group = Group::new(NodeId::Int(0), "");
    let mut has_id = false;

    loop {
        let (field_type, data) = next_field(cursor)?;
        match field_type {
            FIELD_END => break,
            GROUP_ID => {
                group.id = NodeId::Int(field_u32(field_type, data)?);
                has_id = true;
            }
            GROUP_NAME => group.title = field_text(data),
            GROUP_CREATION => group.times.creation = field_date(data),
            GROUP_LAST_MOD => group.times.last_modification = field_date(data),
            GROUP_LAST_ACCESS => group.times.last_access = field_date(data),
            GROUP_EXPIRY => {
                group.times.expiry = field_date(data);
                group.times.expires = group.times.expiry != never_expires();
            }
            GROUP_IMAGE => group.icon = NodeIcon::standard(field_u32(field_type, data)?),
            GROUP_LEVEL => group.level = field_u16(field_type, data)?,
            GROUP_FLAGS => group.flags = field_u32(field_type, data)?,
            _ => {}
        }
    }

    if !has_id {
        return Err(DatabaseError::CorruptFormat("group record without an id".to_string()));
    }
    Ok(group)
}

fn read_entry(cursor: &mut Cursor<&[u8]>, db: &mut DatabaseV3) -> Result<(u32, Entry)> {
    let mut entry = Entry::new(Uuid::nil());
    let mut group_id = None;
    let mut binary_desc = String::new();
    let mut binary_data: &[u8] = &[];

    loop {
        let (field_type, data) = next_field(cursor)?;
        match field_type {
            FIELD_END => break,
            ENTRY_UUID => {
                let bytes: [u8; 16] = data
                    .get(..16)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| DatabaseError::CorruptFormat("entry uuid is too short".to_string()))?;
                entry.id = Uuid::from_bytes(bytes);
            }
            ENTRY_GROUP_ID => group_id = Some(field_u32(field_type, data)?),
            ENTRY_IMAGE => entry.icon = NodeIcon::standard(field_u32(field_type, data)?),
            ENTRY_TITLE => entry.set_text(FIELD_TITLE, &field_text(data)),
            ENTRY_URL => entry.set_text(FIELD_URL, &field_text(data)),
            ENTRY_USERNAME => entry.set_text(FIELD_USERNAME, &field_text(data)),
            ENTRY_PASSWORD => entry.set_text(FIELD_PASSWORD, &field_text(data)),
            ENTRY_NOTES => entry.set_text(FIELD_NOTES, &field_text(data)),
            ENTRY_CREATION => entry.times.creation = field_date(data),
            ENTRY_LAST_MOD => entry.times.last_modification = field_date(data),
            ENTRY_LAST_ACCESS => entry.times.last_access = field_date(data),
            ENTRY_EXPIRY => {
                entry.times.expiry = field_date(data);
                entry.times.expires = entry.times.expiry != never_expires();
            }
            ENTRY_BINARY_DESC => binary_desc = field_text(data),
            ENTRY_BINARY_DATA => binary_data = data,
            _ => {}
        }
    }

    let group_id =
        group_id.ok_or_else(|| DatabaseError::CorruptFormat("entry record without a group id".to_string()))?;
    if !binary_desc.is_empty() || !binary_data.is_empty() {
        let id = db.binaries.add_bytes(false, binary_data)?;
        entry.binaries.insert(binary_desc, id);
    }
    Ok((group_id, entry))
}
