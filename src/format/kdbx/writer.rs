//! KDBX 4 export

use std::io::Write;

use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use log::info;
use zeroize::Zeroizing;

use super::header::HeaderV4;
use super::hmac_stream::{header_hmac, write_blocks};
use super::inner::write_inner_header;
use super::{derive_keys, xml};
use crate::crypto::stream::INNER_STREAM_CHACHA20;
use crate::crypto::{self, InnerStream};
use crate::database::{BinaryAttachment, Compression, DatabaseV4};
use crate::error::Result;
use crate::format::{ProgressSink, Stage, enter_stage};
use crate::utils::random_bytes;

const INNER_STREAM_KEY_SIZE: usize = 64;

/// Serialize and encrypt a KDBX 4 database
///
/// Every save uses a fresh master seed, IV, KDF salt and inner stream key.
pub fn save(db: &DatabaseV4, progress: &mut dyn ProgressSink) -> Result<Vec<u8>> {
    let master_key = db.master_key()?;
    let header = HeaderV4::new(db.cipher, db.compression, &db.kdf, db.public_custom_data.clone());

    enter_stage(progress, Stage::BodySerialize)?;
    let stream_key = Zeroizing::new(random_bytes(INNER_STREAM_KEY_SIZE));
    let (order, refs) = xml::binary_refs(db);
    let attachments: Vec<&BinaryAttachment> = order.iter().filter_map(|id| db.binaries.get(*id)).collect();

    let mut payload = Zeroizing::new(Vec::new());
    write_inner_header(&mut payload, INNER_STREAM_CHACHA20, &stream_key, &attachments)?;
    let mut stream = InnerStream::new(INNER_STREAM_CHACHA20, &stream_key)?;
    let document = Zeroizing::new(xml::write_document(db, &mut stream, &refs)?);
    payload.extend_from_slice(&document);

    let payload = match db.compression {
        Compression::None => payload,
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder.write_all(&payload)?;
            Zeroizing::new(encoder.finish()?)
        }
    };

    enter_stage(progress, Stage::KeyDerivation)?;
    let keys = derive_keys(master_key, &header)?;

    enter_stage(progress, Stage::BodyEncrypt)?;
    let encrypted = header.cipher.encrypt(&payload, &keys.cipher_key, &header.encryption_iv)?;

    let header_bytes = header.to_bytes();
    let mut out = Vec::with_capacity(header_bytes.len() + encrypted.len() + 128);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&crypto::sha256(&[header_bytes.as_slice()]));
    out.extend_from_slice(&header_hmac(&header_bytes, &keys.hmac_key)?);
    out.extend_from_slice(&write_blocks(&encrypted, &keys.hmac_key)?);

    info!(
        "Serialized KDBX database '{}': {} groups, {} entries, {} attachments",
        db.meta.name,
        db.index.group_count(),
        db.index.entry_count(),
        attachments.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::load;
    use super::*;
    use crate::crypto::{EncryptionAlgorithm, KdfKind};
    use crate::database::v4::tests::create_test_v4;
    use crate::database::{CustomIcon, DatabaseConfig, EngineState, NodeId};
    use crate::error::DatabaseError;
    use crate::format::NoProgress;
    use crate::format::tests::RecordingProgress;
    use uuid::Uuid;

    fn config() -> DatabaseConfig {
        DatabaseConfig::default()
    }

    fn fast(db: &mut DatabaseV4, kdf: KdfKind) {
        db.set_kdf(kdf);
        if kdf == KdfKind::AesKdf {
            db.set_rounds(100).unwrap();
        }
    }

    #[test]
    fn test_round_trip_ciphers_and_kdfs() {
        for cipher in [EncryptionAlgorithm::Aes256, EncryptionAlgorithm::ChaCha20] {
            for kdf in [KdfKind::AesKdf, KdfKind::Argon2d, KdfKind::Argon2id] {
                for compression in [Compression::None, Compression::Gzip] {
                    let (mut db, group, entry) = create_test_v4();
                    db.set_encryption_algorithm(cipher);
                    fast(&mut db, kdf);
                    db.set_compression(compression);

                    let data = save(&db, &mut NoProgress).unwrap();
                    let loaded = load(&data, Some("abc123"), None, &config(), &mut NoProgress).unwrap();

                    assert_eq!(loaded.state(), EngineState::Loaded);
                    assert_eq!(loaded.encryption_algorithm(), cipher);
                    assert_eq!(loaded.kdf().kind(), kdf);
                    assert_eq!(loaded.compression(), compression);
                    let e = loaded.index().entry(&entry).unwrap();
                    assert_eq!(e.password(), "secret");
                    assert_eq!(e.parent, Some(group));
                }
            }
        }
    }

    #[test]
    fn test_wrong_password() {
        let (mut db, _, _) = create_test_v4();
        fast(&mut db, KdfKind::AesKdf);
        let data = save(&db, &mut NoProgress).unwrap();
        let result = load(&data, Some("wrong"), None, &config(), &mut NoProgress);
        assert!(matches!(result, Err(DatabaseError::InvalidCredentials)));
    }

    #[test]
    fn test_tampering() {
        let (mut db, _, _) = create_test_v4();
        fast(&mut db, KdfKind::AesKdf);
        let data = save(&db, &mut NoProgress).unwrap();

        // Any header change fails the checksum or the header parse
        let mut header_damage = data.clone();
        header_damage[20] ^= 0x01;
        assert!(load(&header_damage, Some("abc123"), None, &config(), &mut NoProgress).is_err());

        let mut body_damage = data.clone();
        let last = body_damage.len() - 40;
        body_damage[last] ^= 0x01;
        assert!(matches!(
            load(&body_damage, Some("abc123"), None, &config(), &mut NoProgress),
            Err(DatabaseError::CorruptFormat(_))
        ));

        let truncated = &data[..data.len() - 36];
        assert!(matches!(
            load(truncated, Some("abc123"), None, &config(), &mut NoProgress),
            Err(DatabaseError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_attachments_history_and_meta() {
        let (mut db, _, entry_id) = create_test_v4();
        fast(&mut db, KdfKind::AesKdf);
        let shared = db.binaries_mut().add_bytes(true, b"-----BEGIN KEY-----").unwrap();
        let orphan = db.binaries_mut().add_bytes(false, b"unused").unwrap();
        let icon = Uuid::new_v4();
        db.meta_mut().custom_icons.push(CustomIcon {
            uuid: icon,
            data: vec![0x89, b'P', b'N', b'G'],
            name: Some("logo".to_string()),
            last_modified: None,
        });
        {
            let entry = db.index_mut().entry_mut(&entry_id).unwrap();
            entry.icon.custom = Some(icon);
            entry.binaries.insert("key.pem".to_string(), shared);
            let snapshot = entry.snapshot();
            entry.push_history(&snapshot);
            entry.set_password("rotated");
        }
        let bin = db.ensure_recycle_bin().unwrap();

        let data = save(&db, &mut NoProgress).unwrap();
        let loaded = load(&data, Some("abc123"), None, &config(), &mut NoProgress).unwrap();

        assert_eq!(loaded.binaries().len(), 1);
        assert_ne!(orphan, shared);
        let entry = loaded.index().entry(&entry_id).unwrap();
        assert_eq!(entry.password(), "rotated");
        assert_eq!(entry.icon.custom, Some(icon));
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.history[0].password(), "secret");

        let current = loaded.binaries().get(entry.binaries["key.pem"]).unwrap();
        let old = loaded.binaries().get(entry.history[0].binaries["key.pem"]).unwrap();
        assert!(current.is_protected());
        assert_eq!(current.to_vec().unwrap().as_slice(), b"-----BEGIN KEY-----");
        assert_eq!(current, old);

        assert_eq!(loaded.meta().custom_icons.len(), 1);
        assert_eq!(loaded.meta().custom_icons[0].name.as_deref(), Some("logo"));
        assert_eq!(loaded.recycle_bin().map(|g| g.id), Some(bin));
        assert_eq!(loaded.meta().recycle_bin_uuid, bin.as_uuid());
    }

    #[test]
    fn test_tombstones_survive() {
        let (mut db, group, _) = create_test_v4();
        fast(&mut db, KdfKind::AesKdf);
        let gone = Uuid::new_v4();
        db.add_deleted_object(gone);
        let data = save(&db, &mut NoProgress).unwrap();
        let loaded = load(&data, Some("abc123"), None, &config(), &mut NoProgress).unwrap();
        assert_eq!(loaded.deleted_objects().len(), 1);
        assert_eq!(loaded.deleted_objects()[0].uuid, gone);
        assert!(loaded.index().contains_group(&group));
        assert_eq!(loaded.index().root_id(), db.index().root_id());
        assert!(matches!(loaded.index().root_id(), NodeId::Uuid(_)));
    }

    #[test]
    fn test_fresh_seeds_per_save() {
        let (mut db, _, _) = create_test_v4();
        fast(&mut db, KdfKind::AesKdf);
        let a = save(&db, &mut NoProgress).unwrap();
        let b = save(&db, &mut NoProgress).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_stages_and_cancel() {
        let (mut db, _, _) = create_test_v4();
        fast(&mut db, KdfKind::AesKdf);
        let mut progress = RecordingProgress::default();
        let data = save(&db, &mut progress).unwrap();
        assert_eq!(progress.stages, vec![Stage::BodySerialize, Stage::KeyDerivation, Stage::BodyEncrypt]);

        let mut progress = RecordingProgress::default();
        load(&data, Some("abc123"), None, &config(), &mut progress).unwrap();
        assert_eq!(
            progress.stages,
            vec![
                Stage::HeaderParse,
                Stage::KeyDerivation,
                Stage::BodyDecrypt,
                Stage::BodyParse,
                Stage::TreeConstruct
            ]
        );

        let mut progress = RecordingProgress {
            cancel_at: Some(Stage::BodyDecrypt),
            ..Default::default()
        };
        let result = load(&data, Some("abc123"), None, &config(), &mut progress);
        assert!(matches!(result, Err(DatabaseError::Cancelled)));
    }

    #[test]
    fn test_missing_credentials() {
        let db = DatabaseV4::new("empty", &config());
        assert!(matches!(save(&db, &mut NoProgress), Err(DatabaseError::MissingCredentials)));
    }

    #[test]
    fn test_key_file_only() {
        let mut db = DatabaseV4::new("keyed", &config());
        db.set_kdf(KdfKind::AesKdf);
        db.set_rounds(10).unwrap();
        let key_file = [0x42u8; 32];
        db.set_credentials(None, Some(key_file.as_slice())).unwrap();
        let data = save(&db, &mut NoProgress).unwrap();

        let loaded = load(&data, None, Some(key_file.as_slice()), &config(), &mut NoProgress).unwrap();
        assert_eq!(loaded.meta().name, "keyed");
        assert!(matches!(
            load(&data, Some("guess"), None, &config(), &mut NoProgress),
            Err(DatabaseError::InvalidCredentials)
        ));
    }
}
