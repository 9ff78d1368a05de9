//! XML document to [`DatabaseV4`]
//!
//! The document is first read into a small element tree, decrypting each
//! protected value as its element closes, then walked into the model.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::*;
use crate::crypto::InnerStream;
use crate::database::{
    AutoType, AutoTypeAssociation, BinaryId, CustomIcon, DatabaseV4, DeletedObject, Entry, Group, MetaV4, NodeIcon,
    NodeId, NodeIndex, NodeTimes, ProtectedValue,
};
use crate::error::{DatabaseError, Result};
use crate::format::{ProgressSink, check_cancelled};
use crate::utils::from_kdbx_timestamp;

struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    secret: Option<Zeroizing<Vec<u8>>>,
    children: Vec<Element>,
}

impl Element {
    fn start(start: &BytesStart<'_>) -> Result<Self> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            attributes.push((key, attr.unescape_value()?.into_owned()));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
            secret: None,
            children: Vec::new(),
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn child_string(&self, name: &str) -> String {
        self.child_text(name).unwrap_or_default().to_string()
    }

    fn child_bool(&self, name: &str, default: bool) -> bool {
        self.child_text(name).map(parse_bool).unwrap_or(default)
    }

    fn child_time(&self, name: &str) -> Option<DateTime<Utc>> {
        self.child_text(name).and_then(from_kdbx_timestamp)
    }

    fn child_uuid(&self, name: &str) -> Result<Option<Uuid>> {
        match self.child_text(name) {
            Some(text) => parse_optional_uuid(text),
            None => Ok(None),
        }
    }

    fn child_number<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.child_text(name).and_then(|t| t.trim().parse().ok())
    }

    /// Decrypt a protected value with the next bytes of the inner stream
    fn close(mut self, stream: &mut InnerStream) -> Result<Self> {
        if self.attr(ATTR_PROTECTED).is_some_and(parse_bool) {
            let mut data = Zeroizing::new(STANDARD.decode(self.text.trim())?);
            stream.process(&mut data);
            self.secret = Some(data);
            self.text.clear();
        }
        Ok(self)
    }
}

fn parse_tree(xml: &[u8], stream: &mut InnerStream) -> Result<Element> {
    let mut reader = Reader::from_reader(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let closed = match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                stack.push(Element::start(&e)?);
                None
            }
            Event::Empty(e) => Some(Element::start(&e)?.close(stream)?),
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DatabaseError::CorruptFormat("unbalanced XML end tag".to_string()))?;
                Some(element.close(stream)?)
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
                None
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
                None
            }
            Event::Eof => break,
            _ => None,
        };

        if let Some(element) = closed {
            match stack.last_mut() {
                Some(parent) => parent.children.push(element),
                None => return Ok(element),
            }
        }
        buf.clear();
    }
    Err(DatabaseError::CorruptFormat("XML document is incomplete".to_string()))
}

/// Parse the XML payload into `db`
///
/// The binary pool must already hold the inner-header binaries so that `Ref`
/// attributes resolve.
pub fn read_document(
    xml: &[u8],
    stream: &mut InnerStream,
    db: &mut DatabaseV4,
    progress: &mut dyn ProgressSink,
) -> Result<()> {
    let document = parse_tree(xml, stream)?;
    if document.name != TAG_FILE {
        return Err(DatabaseError::CorruptFormat(format!("unexpected root element <{}>", document.name)));
    }

    if let Some(meta) = document.child(TAG_META) {
        read_meta(meta, &mut db.meta)?;
    }

    let root = document
        .child(TAG_ROOT)
        .ok_or_else(|| DatabaseError::CorruptFormat("document has no Root".to_string()))?;
    let root_group = root
        .child(TAG_GROUP)
        .ok_or_else(|| DatabaseError::CorruptFormat("document has no root group".to_string()))?;

    let change_duplicate_id = db.index.change_duplicate_id();
    db.index = NodeIndex::new(read_group(root_group)?, change_duplicate_id);
    let root_id = db.index.root_id();
    let binaries = ReferencedBinaries::new(db);
    read_children(root_group, &root_id, db, &binaries, progress)?;

    if let Some(deleted) = root.child(TAG_DELETED_OBJECTS) {
        for object in deleted.children_named(TAG_DELETED_OBJECT) {
            let Some(uuid) = object.child_uuid("UUID")? else { continue };
            let mut tombstone = DeletedObject::new(uuid);
            if let Some(time) = object.child_time("DeletionTime") {
                tombstone.deletion_time = time;
            }
            if !db.deleted_objects.contains(&tombstone) {
                db.deleted_objects.push(tombstone);
            }
        }
    }

    debug!(
        "Parsed {} groups, {} entries, {} tombstones",
        db.index.group_count(),
        db.index.entry_count(),
        db.deleted_objects.len()
    );
    Ok(())
}

/// Inner-header binary ids present in the pool
struct ReferencedBinaries {
    known: HashSet<BinaryId>,
}

impl ReferencedBinaries {
    fn new(db: &DatabaseV4) -> Self {
        Self {
            known: db.binaries.iter().map(|(id, _)| id).collect(),
        }
    }

    fn resolve(&self, reference: &str) -> Result<BinaryId> {
        reference
            .trim()
            .parse::<BinaryId>()
            .ok()
            .filter(|r| self.known.contains(r))
            .ok_or_else(|| DatabaseError::CorruptFormat(format!("unknown binary reference '{}'", reference)))
    }
}

fn read_children(
    element: &Element,
    parent: &NodeId,
    db: &mut DatabaseV4,
    binaries: &ReferencedBinaries,
    progress: &mut dyn ProgressSink,
) -> Result<()> {
    for child in &element.children {
        if child.name == TAG_ENTRY {
            check_cancelled(progress)?;
            let entry = read_entry(child, binaries, true)?;
            db.index.add_entry_to(entry, parent)?;
        } else if child.name == TAG_GROUP {
            check_cancelled(progress)?;
            let group = read_group(child)?;
            let id = db.index.add_group_to(group, parent)?;
            read_children(child, &id, db, binaries, progress)?;
        }
    }
    Ok(())
}

fn read_icon(element: &Element) -> Result<NodeIcon> {
    Ok(NodeIcon {
        standard: element.child_number("IconID").unwrap_or(0),
        custom: element.child_uuid("CustomIconUUID")?,
    })
}

fn read_times(element: &Element) -> NodeTimes {
    let mut times = NodeTimes::new();
    let Some(t) = element.child(TAG_TIMES) else {
        return times;
    };
    if let Some(v) = t.child_time("CreationTime") {
        times.creation = v;
    }
    if let Some(v) = t.child_time("LastModificationTime") {
        times.last_modification = v;
    }
    if let Some(v) = t.child_time("LastAccessTime") {
        times.last_access = v;
    }
    if let Some(v) = t.child_time("ExpiryTime") {
        times.expiry = v;
    }
    if let Some(v) = t.child_time("LocationChanged") {
        times.location_changed = v;
    }
    times.expires = t.child_bool("Expires", false);
    times.usage_count = t.child_number("UsageCount").unwrap_or(0);
    times
}

fn read_group(element: &Element) -> Result<Group> {
    let id = element
        .child_uuid("UUID")?
        .ok_or_else(|| DatabaseError::CorruptFormat("group without UUID".to_string()))?;
    let mut group = Group::new(NodeId::Uuid(id), &element.child_string("Name"));
    group.notes = element.child_string("Notes");
    group.icon = read_icon(element)?;
    group.times = read_times(element);
    group.is_expanded = element.child_bool("IsExpanded", true);
    group.default_auto_type_sequence = element.child_string("DefaultAutoTypeSequence");
    group.enable_auto_type = element.child_text("EnableAutoType").and_then(parse_nullable_bool);
    group.enable_searching = element.child_text("EnableSearching").and_then(parse_nullable_bool);
    group.last_top_visible_entry = element.child_uuid("LastTopVisibleEntry")?;
    Ok(group)
}

fn read_entry(element: &Element, binaries: &ReferencedBinaries, with_history: bool) -> Result<Entry> {
    let id = element
        .child_uuid("UUID")?
        .ok_or_else(|| DatabaseError::CorruptFormat("entry without UUID".to_string()))?;
    let mut entry = Entry::new(id);
    entry.icon = read_icon(element)?;
    entry.times = read_times(element);
    entry.foreground_color = element.child_string("ForegroundColor");
    entry.background_color = element.child_string("BackgroundColor");
    entry.override_url = element.child_string("OverrideURL");
    entry.tags = element
        .child_text("Tags")
        .map(|t| {
            t.split([';', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for string in element.children_named(TAG_STRING) {
        let Some(key) = string.child_text(TAG_KEY) else { continue };
        let value = match string.child(TAG_VALUE) {
            Some(value) => match &value.secret {
                Some(secret) => ProtectedValue::new(true, secret),
                None => ProtectedValue::from_text(false, &value.text),
            },
            None => ProtectedValue::empty(),
        };
        entry.set_field(key, value);
    }

    for binary in element.children_named(TAG_BINARY) {
        let Some(key) = binary.child_text(TAG_KEY) else { continue };
        let Some(reference) = binary.child(TAG_VALUE).and_then(|v| v.attr(ATTR_REF)) else {
            warn!("Attachment '{}' has no pool reference, skipped", key);
            continue;
        };
        entry.binaries.insert(key.to_string(), binaries.resolve(reference)?);
    }

    if let Some(auto_type) = element.child(TAG_AUTO_TYPE) {
        entry.auto_type = AutoType {
            enabled: auto_type.child_bool("Enabled", true),
            obfuscation: auto_type.child_number("DataTransferObfuscation").unwrap_or(0),
            default_sequence: auto_type.child_string("DefaultSequence"),
            associations: auto_type
                .children_named("Association")
                .map(|a| AutoTypeAssociation {
                    window: a.child_string("Window"),
                    sequence: a.child_string("KeystrokeSequence"),
                })
                .collect(),
        };
    }

    if with_history {
        if let Some(history) = element.child(TAG_HISTORY) {
            for old in history.children_named(TAG_ENTRY) {
                let mut snapshot = read_entry(old, binaries, false)?;
                snapshot.id = id;
                entry.history.push(snapshot);
            }
        }
    }
    Ok(entry)
}

fn read_meta(element: &Element, meta: &mut MetaV4) -> Result<()> {
    if let Some(v) = element.child_text("Generator") {
        meta.generator = v.to_string();
    }
    if let Some(v) = element.child_text("DatabaseName") {
        meta.name = v.to_string();
    }
    if let Some(v) = element.child_time("DatabaseNameChanged") {
        meta.name_changed = v;
    }
    if let Some(v) = element.child_text("DatabaseDescription") {
        meta.description = v.to_string();
    }
    if let Some(v) = element.child_time("DatabaseDescriptionChanged") {
        meta.description_changed = v;
    }
    if let Some(v) = element.child_text("DefaultUserName") {
        meta.default_username = v.to_string();
    }
    if let Some(v) = element.child_time("DefaultUserNameChanged") {
        meta.default_username_changed = v;
    }
    if let Some(v) = element.child_number("MaintenanceHistoryDays") {
        meta.maintenance_history_days = v;
    }
    if let Some(v) = element.child_text("Color") {
        meta.color = v.to_string();
    }
    if let Some(v) = element.child_time("MasterKeyChanged") {
        meta.master_key_changed = v;
    }
    if let Some(v) = element.child_number("MasterKeyChangeRec") {
        meta.master_key_change_rec = v;
    }
    if let Some(v) = element.child_number("MasterKeyChangeForce") {
        meta.master_key_change_force = v;
    }

    if let Some(protection) = element.child("MemoryProtection") {
        let p = &mut meta.memory_protection;
        p.title = protection.child_bool("ProtectTitle", p.title);
        p.username = protection.child_bool("ProtectUserName", p.username);
        p.password = protection.child_bool("ProtectPassword", p.password);
        p.url = protection.child_bool("ProtectURL", p.url);
        p.notes = protection.child_bool("ProtectNotes", p.notes);
    }

    if let Some(icons) = element.child("CustomIcons") {
        meta.custom_icons.clear();
        for icon in icons.children_named("Icon") {
            let Some(uuid) = icon.child_uuid("UUID")? else { continue };
            let data = STANDARD.decode(icon.child_text("Data").unwrap_or_default().trim())?;
            meta.custom_icons.push(CustomIcon {
                uuid,
                data,
                name: icon.child_text("Name").map(str::to_string),
                last_modified: icon.child_time("LastModificationTime"),
            });
        }
    }

    if let Some(v) = element.child_text("RecycleBinEnabled") {
        meta.recycle_bin_enabled = parse_bool(v);
    }
    meta.recycle_bin_uuid = element.child_uuid("RecycleBinUUID")?;
    if let Some(v) = element.child_time("RecycleBinChanged") {
        meta.recycle_bin_changed = v;
    }
    meta.entry_templates_group = element.child_uuid("EntryTemplatesGroup")?;
    if let Some(v) = element.child_time("EntryTemplatesGroupChanged") {
        meta.entry_templates_group_changed = v;
    }
    if let Some(v) = element.child_number("HistoryMaxItems") {
        meta.history_max_items = v;
    }
    if let Some(v) = element.child_number("HistoryMaxSize") {
        meta.history_max_size = v;
    }
    meta.last_selected_group = element.child_uuid("LastSelectedGroup")?;
    meta.last_top_visible_group = element.child_uuid("LastTopVisibleGroup")?;
    if let Some(v) = element.child_time("SettingsChanged") {
        meta.settings_changed = v;
    }

    if let Some(data) = element.child("CustomData") {
        meta.custom_data = data
            .children_named("Item")
            .filter_map(|item| Some((item.child_text(TAG_KEY)?.to_string(), item.child_string(TAG_VALUE))))
            .collect();
    }
    Ok(())
}
