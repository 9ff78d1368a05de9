//! [`DatabaseV4`] to XML document

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use uuid::Uuid;

use super::*;
use crate::crypto::InnerStream;
use crate::database::{BinaryId, DatabaseV4, Entry, Group, MetaV4, NodeIcon, NodeId, NodeTimes, ProtectedValue};
use crate::error::{DatabaseError, Result};
use crate::utils::to_kdbx_timestamp;

/// Binaries referenced from the tree, in first-use order, and the inner
/// header index each one is written under
///
/// Orphaned pool entries are not written.
pub fn binary_refs(db: &DatabaseV4) -> (Vec<BinaryId>, HashMap<BinaryId, u32>) {
    let mut order = Vec::new();
    let mut refs = HashMap::new();
    let mut visit = |entry: &Entry| {
        for id in entry.binaries.values() {
            if db.binaries.get(*id).is_some() && !refs.contains_key(id) {
                refs.insert(*id, order.len() as u32);
                order.push(*id);
            }
        }
    };

    let mut pending = vec![db.index.root_id()];
    while let Some(group_id) = pending.pop() {
        let Some(group) = db.index.group(&group_id) else { continue };
        for entry in group.child_entries.iter().filter_map(|id| db.index.entry(id)) {
            visit(entry);
            entry.history.iter().for_each(&mut visit);
        }
        pending.extend(group.child_groups.iter().rev().copied());
    }
    (order, refs)
}

struct XmlOut<'a> {
    writer: Writer<Vec<u8>>,
    stream: &'a mut InnerStream,
    refs: &'a HashMap<BinaryId, u32>,
}

fn write_failed<E: std::fmt::Display>(err: E) -> DatabaseError {
    DatabaseError::Io(std::io::Error::other(err.to_string()))
}

impl XmlOut<'_> {
    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event).map_err(write_failed)
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, name: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.event(Event::Empty(BytesStart::new(name)));
        }
        self.start(name)?;
        self.event(Event::Text(BytesText::new(&xml_safe(value))))?;
        self.end(name)
    }

    fn bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.text(name, format_bool(value))
    }

    fn nullable_bool(&mut self, name: &str, value: Option<bool>) -> Result<()> {
        self.text(name, format_nullable_bool(value))
    }

    fn number<T: ToString>(&mut self, name: &str, value: T) -> Result<()> {
        self.text(name, &value.to_string())
    }

    fn uuid(&mut self, name: &str, value: &Uuid) -> Result<()> {
        self.text(name, &format_uuid(value))
    }

    fn optional_uuid(&mut self, name: &str, value: Option<Uuid>) -> Result<()> {
        self.uuid(name, &value.unwrap_or(Uuid::nil()))
    }

    fn time(&mut self, name: &str, value: &DateTime<Utc>) -> Result<()> {
        self.text(name, &to_kdbx_timestamp(value))
    }

    /// `<Value>`, XORed with the inner stream when protected
    fn value(&mut self, value: &ProtectedValue, protect: bool) -> Result<()> {
        if !protect {
            return self.text(TAG_VALUE, &value.to_text());
        }
        let mut bytes = value.bytes();
        self.stream.process(&mut bytes);
        let encoded = STANDARD.encode(bytes.as_slice());
        let mut start = BytesStart::new(TAG_VALUE);
        start.push_attribute((ATTR_PROTECTED, VALUE_TRUE));
        if encoded.is_empty() {
            return self.event(Event::Empty(start));
        }
        self.event(Event::Start(start))?;
        self.event(Event::Text(BytesText::new(&encoded)))?;
        self.end(TAG_VALUE)
    }
}

/// Serialize `db` to an XML document
pub fn write_document(
    db: &DatabaseV4,
    stream: &mut InnerStream,
    refs: &HashMap<BinaryId, u32>,
) -> Result<Vec<u8>> {
    let mut out = XmlOut {
        writer: Writer::new_with_indent(Vec::new(), b'\t', 1),
        stream,
        refs,
    };
    out.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;
    out.start(TAG_FILE)?;
    write_meta(&mut out, &db.meta)?;

    out.start(TAG_ROOT)?;
    let root_id = db.index.root_id();
    write_group(&mut out, db, &root_id)?;
    out.start(TAG_DELETED_OBJECTS)?;
    for object in &db.deleted_objects {
        out.start(TAG_DELETED_OBJECT)?;
        out.uuid("UUID", &object.uuid)?;
        out.time("DeletionTime", &object.deletion_time)?;
        out.end(TAG_DELETED_OBJECT)?;
    }
    out.end(TAG_DELETED_OBJECTS)?;
    out.end(TAG_ROOT)?;

    out.end(TAG_FILE)?;
    Ok(out.writer.into_inner())
}

fn write_meta(out: &mut XmlOut<'_>, meta: &MetaV4) -> Result<()> {
    out.start(TAG_META)?;
    out.text("Generator", &meta.generator)?;
    out.text("DatabaseName", &meta.name)?;
    out.time("DatabaseNameChanged", &meta.name_changed)?;
    out.text("DatabaseDescription", &meta.description)?;
    out.time("DatabaseDescriptionChanged", &meta.description_changed)?;
    out.text("DefaultUserName", &meta.default_username)?;
    out.time("DefaultUserNameChanged", &meta.default_username_changed)?;
    out.number("MaintenanceHistoryDays", meta.maintenance_history_days)?;
    out.text("Color", &meta.color)?;
    out.time("MasterKeyChanged", &meta.master_key_changed)?;
    out.number("MasterKeyChangeRec", meta.master_key_change_rec)?;
    out.number("MasterKeyChangeForce", meta.master_key_change_force)?;

    let p = &meta.memory_protection;
    out.start("MemoryProtection")?;
    out.bool("ProtectTitle", p.title)?;
    out.bool("ProtectUserName", p.username)?;
    out.bool("ProtectPassword", p.password)?;
    out.bool("ProtectURL", p.url)?;
    out.bool("ProtectNotes", p.notes)?;
    out.end("MemoryProtection")?;

    out.start("CustomIcons")?;
    for icon in &meta.custom_icons {
        out.start("Icon")?;
        out.uuid("UUID", &icon.uuid)?;
        out.text("Data", &STANDARD.encode(&icon.data))?;
        if let Some(name) = &icon.name {
            out.text("Name", name)?;
        }
        if let Some(modified) = &icon.last_modified {
            out.time("LastModificationTime", modified)?;
        }
        out.end("Icon")?;
    }
    out.end("CustomIcons")?;

    out.bool("RecycleBinEnabled", meta.recycle_bin_enabled)?;
    out.optional_uuid("RecycleBinUUID", meta.recycle_bin_uuid)?;
    out.time("RecycleBinChanged", &meta.recycle_bin_changed)?;
    out.optional_uuid("EntryTemplatesGroup", meta.entry_templates_group)?;
    out.time("EntryTemplatesGroupChanged", &meta.entry_templates_group_changed)?;
    out.number("HistoryMaxItems", meta.history_max_items)?;
    out.number("HistoryMaxSize", meta.history_max_size)?;
    out.optional_uuid("LastSelectedGroup", meta.last_selected_group)?;
    out.optional_uuid("LastTopVisibleGroup", meta.last_top_visible_group)?;
    out.time("SettingsChanged", &meta.settings_changed)?;

    out.start("CustomData")?;
    for (key, value) in &meta.custom_data {
        out.start("Item")?;
        out.text(TAG_KEY, key)?;
        out.text(TAG_VALUE, value)?;
        out.end("Item")?;
    }
    out.end("CustomData")?;
    out.end(TAG_META)
}

fn write_icon(out: &mut XmlOut<'_>, icon: &NodeIcon) -> Result<()> {
    out.number("IconID", icon.standard)?;
    if let Some(custom) = &icon.custom {
        out.uuid("CustomIconUUID", custom)?;
    }
    Ok(())
}

fn write_times(out: &mut XmlOut<'_>, times: &NodeTimes) -> Result<()> {
    out.start(TAG_TIMES)?;
    out.time("CreationTime", &times.creation)?;
    out.time("LastModificationTime", &times.last_modification)?;
    out.time("LastAccessTime", &times.last_access)?;
    out.time("ExpiryTime", &times.expiry)?;
    out.bool("Expires", times.expires)?;
    out.number("UsageCount", times.usage_count)?;
    out.time("LocationChanged", &times.location_changed)?;
    out.end(TAG_TIMES)
}

fn group_uuid(group: &Group) -> Result<Uuid> {
    group
        .id
        .as_uuid()
        .ok_or_else(|| DatabaseError::CorruptFormat(format!("group {} has no UUID", group.id)))
}

fn write_group(out: &mut XmlOut<'_>, db: &DatabaseV4, id: &NodeId) -> Result<()> {
    let group = db
        .index
        .group(id)
        .ok_or_else(|| DatabaseError::NodeNotFound(format!("group {}", id)))?;

    out.start(TAG_GROUP)?;
    out.uuid("UUID", &group_uuid(group)?)?;
    out.text("Name", &group.title)?;
    out.text("Notes", &group.notes)?;
    write_icon(out, &group.icon)?;
    write_times(out, &group.times)?;
    out.bool("IsExpanded", group.is_expanded)?;
    out.text("DefaultAutoTypeSequence", &group.default_auto_type_sequence)?;
    out.nullable_bool("EnableAutoType", group.enable_auto_type)?;
    out.nullable_bool("EnableSearching", group.enable_searching)?;
    out.optional_uuid("LastTopVisibleEntry", group.last_top_visible_entry)?;

    for entry_id in &group.child_entries {
        let entry = db
            .index
            .entry(entry_id)
            .ok_or_else(|| DatabaseError::NodeNotFound(format!("entry {}", NodeId::Uuid(*entry_id))))?;
        write_entry(out, &db.meta, entry, true)?;
    }
    for child in &group.child_groups {
        write_group(out, db, child)?;
    }
    out.end(TAG_GROUP)
}

fn write_entry(out: &mut XmlOut<'_>, meta: &MetaV4, entry: &Entry, with_history: bool) -> Result<()> {
    out.start(TAG_ENTRY)?;
    out.uuid("UUID", &entry.id)?;
    write_icon(out, &entry.icon)?;
    out.text("ForegroundColor", &entry.foreground_color)?;
    out.text("BackgroundColor", &entry.background_color)?;
    out.text("OverrideURL", &entry.override_url)?;
    out.text("Tags", &entry.tags.join(";"))?;
    write_times(out, &entry.times)?;

    for (key, value) in &entry.fields {
        out.start(TAG_STRING)?;
        out.text(TAG_KEY, key)?;
        let protect = value.is_protected() || meta.memory_protection.is_protected(key);
        out.value(value, protect)?;
        out.end(TAG_STRING)?;
    }

    for (key, id) in &entry.binaries {
        let Some(reference) = out.refs.get(id).copied() else { continue };
        out.start(TAG_BINARY)?;
        out.text(TAG_KEY, key)?;
        let mut value = BytesStart::new(TAG_VALUE);
        value.push_attribute((ATTR_REF, reference.to_string().as_str()));
        out.event(Event::Empty(value))?;
        out.end(TAG_BINARY)?;
    }

    let auto_type = &entry.auto_type;
    out.start(TAG_AUTO_TYPE)?;
    out.bool("Enabled", auto_type.enabled)?;
    out.number("DataTransferObfuscation", auto_type.obfuscation)?;
    out.text("DefaultSequence", &auto_type.default_sequence)?;
    for association in &auto_type.associations {
        out.start("Association")?;
        out.text("Window", &association.window)?;
        out.text("KeystrokeSequence", &association.sequence)?;
        out.end("Association")?;
    }
    out.end(TAG_AUTO_TYPE)?;

    if with_history {
        out.start(TAG_HISTORY)?;
        for old in &entry.history {
            write_entry(out, meta, old, false)?;
        }
        out.end(TAG_HISTORY)?;
    }
    out.end(TAG_ENTRY)
}
