//! KDB export

use log::{debug, info};
use zeroize::Zeroizing;

use super::header::HeaderV3;
use super::*;
use crate::crypto;
use crate::database::entry::{FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME, STANDARD_FIELDS};
use crate::database::{DatabaseV3, Entry, Group, NodeId, NodeTimes};
use crate::error::{DatabaseError, Result};
use crate::format::{ProgressSink, Stage, check_cancelled, enter_stage, percent};
use crate::utils::{never_expires, pack_kdb_date};

/// Serialize and encrypt a KDB database with fresh seeds
///
/// Groups are written depth first with recomputed levels; entries follow in
/// the order of their groups.
pub fn save(db: &DatabaseV3, progress: &mut dyn ProgressSink) -> Result<Vec<u8>> {
    let rounds = u32::try_from(db.rounds()).map_err(|_| DatabaseError::NumberFormat(db.rounds()))?;
    let mut header = HeaderV3::new(rounds);

    enter_stage(progress, Stage::BodySerialize)?;
    let index = db.index();
    let root = index.root_id();
    let groups = index.descendant_groups(&root);
    let entries: Vec<&Entry> = groups
        .iter()
        .filter_map(|id| index.group(id))
        .flat_map(|g| g.child_entries.iter())
        .filter_map(|id| index.entry(id))
        .collect();
    let total = groups.len() + entries.len();

    let mut body = Zeroizing::new(Vec::new());
    for (i, id) in groups.iter().enumerate() {
        let group = index
            .group(id)
            .ok_or_else(|| DatabaseError::NodeNotFound(format!("group {}", id)))?;
        let level = u16::try_from(index.depth(id)).unwrap_or(0);
        write_group(&mut body, group, level)?;
        progress.update_progress(percent(i + 1, total));
        check_cancelled(progress)?;
    }
    for (i, entry) in entries.iter().enumerate() {
        write_entry(&mut body, entry, db)?;
        progress.update_progress(percent(groups.len() + i + 1, total));
        check_cancelled(progress)?;
    }

    header.num_groups = groups.len() as u32;
    header.num_entries = entries.len() as u32;
    header.contents_hash = crypto::sha256(&[body.as_slice()]);

    enter_stage(progress, Stage::KeyDerivation)?;
    let key = final_key(db.master_key()?, &header);

    enter_stage(progress, Stage::BodyEncrypt)?;
    let encrypted = crypto::encrypt(&body, &key, &header.encryption_iv);

    let mut out = header.to_bytes();
    out.extend_from_slice(&encrypted);
    info!("Serialized KDB database: {} groups, {} entries", groups.len(), entries.len());
    Ok(out)
}

fn write_field(out: &mut Vec<u8>, field_type: u16, data: &[u8]) {
    out.extend_from_slice(&field_type.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

fn write_text(out: &mut Vec<u8>, field_type: u16, text: &str) {
    let mut data = Zeroizing::new(Vec::with_capacity(text.len() + 1));
    data.extend_from_slice(text.as_bytes());
    data.push(0);
    write_field(out, field_type, &data);
}

fn write_times(out: &mut Vec<u8>, first_field: u16, times: &NodeTimes) {
    let expiry = if times.expires { times.expiry } else { never_expires() };
    write_field(out, first_field, &pack_kdb_date(&times.creation));
    write_field(out, first_field + 1, &pack_kdb_date(&times.last_modification));
    write_field(out, first_field + 2, &pack_kdb_date(&times.last_access));
    write_field(out, first_field + 3, &pack_kdb_date(&expiry));
}

fn write_group(out: &mut Vec<u8>, group: &Group, level: u16) -> Result<()> {
    let NodeId::Int(id) = group.id else {
        return Err(DatabaseError::CorruptFormat(format!("group {} has no integer id", group.id)));
    };
    write_field(out, GROUP_ID, &id.to_le_bytes());
    write_text(out, GROUP_NAME, &group.title);
    write_times(out, GROUP_CREATION, &group.times);
    write_field(out, GROUP_IMAGE, &group.icon.standard.to_le_bytes());
    write_field(out, GROUP_LEVEL, &level.to_le_bytes());
    write_field(out, GROUP_FLAGS, &group.flags.to_le_bytes());
    write_field(out, FIELD_END, &[]);
    Ok(())
}

fn write_entry(out: &mut Vec<u8>, entry: &Entry, db: &DatabaseV3) -> Result<()> {
    let Some(NodeId::Int(group_id)) = entry.parent else {
        return Err(DatabaseError::CorruptFormat(format!(
            "entry {} is not inside a group",
            NodeId::Uuid(entry.id)
        )));
    };
    if entry.fields.keys().any(|k| !STANDARD_FIELDS.contains(&k.as_str())) {
        debug!("Custom fields of entry {} are not stored in KDB", NodeId::Uuid(entry.id));
    }

    write_field(out, ENTRY_UUID, entry.id.as_bytes());
    write_field(out, ENTRY_GROUP_ID, &group_id.to_le_bytes());
    write_field(out, ENTRY_IMAGE, &entry.icon.standard.to_le_bytes());
    write_text(out, ENTRY_TITLE, &entry.field_text(FIELD_TITLE));
    write_text(out, ENTRY_URL, &entry.field_text(FIELD_URL));
    write_text(out, ENTRY_USERNAME, &entry.field_text(FIELD_USERNAME));
    let mut password = entry
        .field(FIELD_PASSWORD)
        .map(|v| v.bytes())
        .unwrap_or_else(|| Zeroizing::new(Vec::new()));
    password.push(0);
    write_field(out, ENTRY_PASSWORD, &password);
    write_text(out, ENTRY_NOTES, &entry.field_text(FIELD_NOTES));
    write_times(out, ENTRY_CREATION, &entry.times);

    // KDB holds at most one attachment per entry
    match entry.binaries.iter().next() {
        Some((name, id)) => {
            let content = match db.binaries().get(*id) {
                Some(attachment) => attachment.to_vec()?,
                None => Zeroizing::new(Vec::new()),
            };
            write_text(out, ENTRY_BINARY_DESC, name);
            write_field(out, ENTRY_BINARY_DATA, &content);
        }
        None => {
            write_text(out, ENTRY_BINARY_DESC, "");
            write_field(out, ENTRY_BINARY_DATA, &[]);
        }
    }
    write_field(out, FIELD_END, &[]);
    Ok(())
}
