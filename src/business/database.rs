//! Main Database API
//!
//! [`Database`] owns at most one engine of either format and orchestrates
//! loading, saving and teardown. Node operations live in the sibling
//! modules as further `impl Database` blocks.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{EncryptionAlgorithm, KdfKind};
use crate::database::{
    Compression, DatabaseConfig, DatabaseV3, DatabaseV4, Engine, EngineState, FormatVersion,
};
use crate::error::{DatabaseError, Result};
use crate::format::{self, ProgressSink, Stage, enter_stage, kdb, kdbx};
use crate::utils::now;

/// Password database of either format
#[derive(Debug, Default)]
pub struct Database {
    /// Loaded or created engine
    pub(crate) engine: Option<Engine>,
    /// Settings for new and loaded engines
    pub(crate) config: DatabaseConfig,
    /// Advisory flag for callers that opened the file read-only
    pub(crate) read_only: bool,
}

impl Database {
    /// Facade with the default configuration and nothing loaded
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DatabaseConfig) -> Self {
        Self {
            engine: None,
            config,
            read_only: false,
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Fail with `NotLoaded` unless an engine is present
    pub(crate) fn require_engine(&self) -> Result<&Engine> {
        self.engine.as_ref().ok_or(DatabaseError::NotLoaded)
    }

    pub(crate) fn require_engine_mut(&mut self) -> Result<&mut Engine> {
        self.engine.as_mut().ok_or(DatabaseError::NotLoaded)
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    /// Direct engine access for format-specific settings
    pub fn engine_mut(&mut self) -> Option<&mut Engine> {
        self.engine.as_mut()
    }

    pub fn is_loaded(&self) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|e| e.state() == EngineState::Loaded)
    }

    /// Replace the current engine, clearing the old one
    fn install(&mut self, engine: Engine) {
        if let Some(mut old) = self.engine.replace(engine) {
            old.clear();
        }
    }

    /// Start an empty KeePass 1 database whose synthetic root is titled `name`
    pub fn create_v3(&mut self, name: &str) {
        let mut db = DatabaseV3::new(&self.config);
        let root = db.index().root_id();
        if let Some(group) = db.index_mut().group_mut(&root) {
            group.title = name.to_string();
        }
        db.state = EngineState::Loaded;
        self.install(Engine::V3(db));
        self.read_only = false;
        info!("Created KDB database");
    }

    /// Start an empty KeePass 2 database named `name`
    pub fn create_v4(&mut self, name: &str) {
        let mut db = DatabaseV4::new(name, &self.config);
        db.state = EngineState::Loaded;
        self.install(Engine::V4(db));
        self.read_only = false;
        info!("Created KDBX database '{}'", name);
    }

    /// Set the composite key used by later saves
    pub fn set_credentials(&mut self, password: Option<&str>, key_file: Option<&[u8]>) -> Result<()> {
        self.require_engine_mut()?.set_credentials(password, key_file)
    }

    /// Load a database from a stream
    ///
    /// On any failure the previously loaded engine, if any, stays in place.
    pub fn load_data<R: Read + Seek>(
        &mut self,
        reader: R,
        password: Option<&str>,
        key_file: Option<&mut dyn Read>,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let mut reader = BufReader::new(reader);
        enter_stage(progress, Stage::HeaderSniff)?;
        let version = format::sniff(&mut reader)?;
        debug!("Detected {} format", version);
        let data = format::read_to_end(&mut reader)?;

        let key = match key_file {
            Some(source) => {
                let mut buf = Zeroizing::new(Vec::new());
                source.read_to_end(&mut buf)?;
                Some(buf)
            }
            None => None,
        };
        let key = key.as_ref().map(|k| k.as_slice());

        let engine = match version {
            FormatVersion::V3 => Engine::V3(kdb::load(&data, password, key, &self.config, progress)?),
            FormatVersion::V4 => Engine::V4(kdbx::load(&data, password, key, &self.config, progress)?),
        };
        self.install(engine);
        self.read_only = false;
        Ok(())
    }

    /// Load a database file, reading the optional key file from disk
    pub fn load_file(
        &mut self,
        path: &Path,
        password: Option<&str>,
        key_file: Option<&Path>,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let file = File::open(path)?;
        match key_file {
            Some(key_path) => {
                let mut key = File::open(key_path)?;
                self.load_data(file, password, Some(&mut key), progress)
            }
            None => self.load_data(file, password, None, progress),
        }
    }

    /// Encode and encrypt the current engine into `writer`
    pub fn save_data<W: Write>(&self, mut writer: W, progress: &mut dyn ProgressSink) -> Result<()> {
        let data = match self.require_engine()? {
            Engine::V3(db) => kdb::save(db, progress)?,
            Engine::V4(db) => kdbx::save(db, progress)?,
        };
        enter_stage(progress, Stage::Write)?;
        writer.write_all(&data)?;
        writer.flush()?;
        Ok(())
    }

    /// Save to `path` through `<path>.tmp` and an atomic rename
    ///
    /// The original file is untouched when any step fails, and the
    /// temporary file is removed.
    pub fn save_file(&self, path: &Path, progress: &mut dyn ProgressSink) -> Result<()> {
        let tmp = temp_path(path);
        match self.write_then_rename(path, &tmp, progress) {
            Ok(()) => {
                info!("Saved database to {}", path.display());
                Ok(())
            }
            Err(e) => {
                error!("Saving {} failed: {}", path.display(), e);
                if tmp.exists() {
                    if let Err(rm) = fs::remove_file(&tmp) {
                        warn!("Could not remove {}: {}", tmp.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    fn write_then_rename(&self, path: &Path, tmp: &Path, progress: &mut dyn ProgressSink) -> Result<()> {
        let mut writer = BufWriter::new(File::create(tmp)?);
        self.save_data(&mut writer, progress)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(tmp, path)?;
        Ok(())
    }

    /// Wipe secrets and scratch files; the facade returns to unloaded
    pub fn clear(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.clear();
            debug!("Database cleared");
        }
        self.read_only = false;
    }

    /// Alias kept for callers that close and wipe in one step
    pub fn close_and_clear(&mut self) {
        self.clear();
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    // Metadata

    pub fn version(&self) -> Option<FormatVersion> {
        self.engine.as_ref().map(Engine::version)
    }

    /// "KeePass 1" or "KeePass 2"
    pub fn version_name(&self) -> Option<String> {
        self.version().map(|v| v.to_string())
    }

    /// KDBX database name; KDB files have none
    pub fn name(&self) -> Option<&str> {
        match self.engine.as_ref()? {
            Engine::V3(_) => None,
            Engine::V4(db) => Some(db.meta().name.as_str()),
        }
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if let Engine::V4(db) = self.require_engine_mut()? {
            let meta = db.meta_mut();
            meta.name = name.to_string();
            meta.name_changed = now();
        }
        Ok(())
    }

    pub fn description(&self) -> Option<&str> {
        match self.engine.as_ref()? {
            Engine::V3(_) => None,
            Engine::V4(db) => Some(db.meta().description.as_str()),
        }
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        if let Engine::V4(db) = self.require_engine_mut()? {
            let meta = db.meta_mut();
            meta.description = description.to_string();
            meta.description_changed = now();
        }
        Ok(())
    }

    pub fn default_username(&self) -> Option<&str> {
        match self.engine.as_ref()? {
            Engine::V3(_) => None,
            Engine::V4(db) => Some(db.meta().default_username.as_str()),
        }
    }

    pub fn set_default_username(&mut self, username: &str) -> Result<()> {
        if let Engine::V4(db) = self.require_engine_mut()? {
            let meta = db.meta_mut();
            meta.default_username = username.to_string();
            meta.default_username_changed = now();
        }
        Ok(())
    }

    pub fn encryption_algorithm(&self) -> Option<EncryptionAlgorithm> {
        self.engine.as_ref().map(Engine::encryption_algorithm)
    }

    pub fn available_encryption_algorithms(&self) -> Vec<EncryptionAlgorithm> {
        self.engine
            .as_ref()
            .map(Engine::available_encryption_algorithms)
            .unwrap_or_default()
    }

    /// Select the payload cipher; KDB only supports AES
    pub fn set_encryption_algorithm(&mut self, cipher: EncryptionAlgorithm) -> Result<()> {
        match self.require_engine_mut()? {
            Engine::V4(db) => db.set_encryption_algorithm(cipher),
            Engine::V3(_) if cipher == EncryptionAlgorithm::Aes256 => {}
            Engine::V3(_) => return Err(DatabaseError::UnsupportedAlgorithm(cipher.to_string())),
        }
        Ok(())
    }

    pub fn kdf(&self) -> Option<KdfKind> {
        self.engine.as_ref().map(Engine::kdf)
    }

    pub fn available_kdfs(&self) -> Vec<KdfKind> {
        self.engine.as_ref().map(Engine::available_kdfs).unwrap_or_default()
    }

    /// Select the KDF with its default costs; KDB only supports AES-KDF
    pub fn set_kdf(&mut self, kdf: KdfKind) -> Result<()> {
        match self.require_engine_mut()? {
            Engine::V4(db) => db.set_kdf(kdf),
            Engine::V3(_) if kdf == KdfKind::AesKdf => {}
            Engine::V3(_) => return Err(DatabaseError::UnsupportedAlgorithm(kdf.to_string())),
        }
        Ok(())
    }

    pub fn rounds(&self) -> Option<u64> {
        self.engine.as_ref().map(Engine::rounds)
    }

    pub fn set_rounds(&mut self, rounds: u64) -> Result<()> {
        self.require_engine_mut()?.set_rounds(rounds)
    }

    /// Argon2 memory cost in bytes
    pub fn memory_usage(&self) -> Option<u64> {
        self.engine.as_ref().and_then(Engine::memory_usage)
    }

    pub fn set_memory_usage(&mut self, bytes: u64) -> Result<()> {
        if let Engine::V4(db) = self.require_engine_mut()? {
            db.set_memory_usage(bytes);
        }
        Ok(())
    }

    pub fn parallelism(&self) -> Option<u32> {
        self.engine.as_ref().and_then(Engine::parallelism)
    }

    pub fn set_parallelism(&mut self, lanes: u32) -> Result<()> {
        if let Engine::V4(db) = self.require_engine_mut()? {
            db.set_parallelism(lanes);
        }
        Ok(())
    }

    pub fn compression(&self) -> Option<Compression> {
        match self.engine.as_ref()? {
            Engine::V3(_) => None,
            Engine::V4(db) => Some(db.compression()),
        }
    }

    pub fn set_compression(&mut self, compression: Compression) -> Result<()> {
        if let Engine::V4(db) = self.require_engine_mut()? {
            db.set_compression(compression);
        }
        Ok(())
    }

    pub fn is_password_encoding_error(&self) -> bool {
        self.engine
            .as_ref()
            .is_some_and(Engine::is_password_encoding_error)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.clear();
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::NoProgress;
    use crate::format::tests::RecordingProgress;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Loaded KDBX facade with cheap KDF settings and credentials "abc123"
    pub(crate) fn create_test_database() -> Database {
        let mut db = Database::new();
        db.create_v4("Test Database");
        db.set_kdf(KdfKind::AesKdf).unwrap();
        db.set_rounds(10).unwrap();
        db.set_credentials(Some("abc123"), None).unwrap();
        db
    }

    pub(crate) fn create_test_database_v3() -> Database {
        let mut db = Database::new();
        db.create_v3("Test Database");
        db.set_rounds(10).unwrap();
        db.set_credentials(Some("abc123"), None).unwrap();
        db
    }

    fn saved(db: &Database) -> Vec<u8> {
        let mut out = Vec::new();
        db.save_data(&mut out, &mut NoProgress).unwrap();
        out
    }

    #[test]
    fn test_new_is_unloaded() {
        let db = Database::new();
        assert!(!db.is_loaded());
        assert!(db.version().is_none());
        assert!(db.name().is_none());
        assert!(db.available_kdfs().is_empty());
        assert!(matches!(db.save_data(Vec::new(), &mut NoProgress), Err(DatabaseError::NotLoaded)));
    }

    #[test]
    fn test_create_and_metadata() {
        let mut db = create_test_database();
        assert!(db.is_loaded());
        assert_eq!(db.version(), Some(FormatVersion::V4));
        assert_eq!(db.version_name().as_deref(), Some("KeePass 2"));
        assert_eq!(db.name(), Some("Test Database"));

        db.set_description("Personal").unwrap();
        db.set_default_username("me").unwrap();
        assert_eq!(db.description(), Some("Personal"));
        assert_eq!(db.default_username(), Some("me"));
        assert_eq!(db.kdf(), Some(KdfKind::AesKdf));
        assert_eq!(db.rounds(), Some(10));
        assert_eq!(db.memory_usage(), None);

        let v3 = create_test_database_v3();
        assert_eq!(v3.version_name().as_deref(), Some("KeePass 1"));
        assert_eq!(v3.available_encryption_algorithms(), vec![EncryptionAlgorithm::Aes256]);
    }

    #[test]
    fn test_v3_rejects_modern_algorithms() {
        let mut db = create_test_database_v3();
        assert!(matches!(
            db.set_encryption_algorithm(EncryptionAlgorithm::ChaCha20),
            Err(DatabaseError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(db.set_kdf(KdfKind::Argon2id), Err(DatabaseError::UnsupportedAlgorithm(_))));
        assert!(db.set_kdf(KdfKind::AesKdf).is_ok());
    }

    #[test]
    fn test_load_data_round_trip() {
        for mut db in [create_test_database(), create_test_database_v3()] {
            let data = saved(&db);
            let version = db.version();
            db.clear();
            assert!(!db.is_loaded());

            db.load_data(Cursor::new(data), Some("abc123"), None, &mut NoProgress).unwrap();
            assert!(db.is_loaded());
            assert_eq!(db.version(), version);
        }
    }

    #[test]
    fn test_failed_load_keeps_previous_engine() {
        let mut db = create_test_database();
        let data = saved(&db);

        let result = db.load_data(Cursor::new(data.clone()), Some("wrong"), None, &mut NoProgress);
        assert!(matches!(result, Err(DatabaseError::InvalidCredentials)));
        assert!(db.is_loaded());
        assert_eq!(db.name(), Some("Test Database"));

        let result = db.load_data(Cursor::new(vec![1u8, 2, 3]), Some("abc123"), None, &mut NoProgress);
        assert!(matches!(result, Err(DatabaseError::InvalidSignature)));
        assert!(db.is_loaded());
    }

    #[test]
    fn test_cancelled_load_leaves_facade_unloaded() {
        let source = create_test_database();
        let data = saved(&source);

        let mut db = Database::new();
        let mut progress = RecordingProgress {
            cancel_at: Some(Stage::KeyDerivation),
            ..Default::default()
        };
        let result = db.load_data(Cursor::new(data), Some("abc123"), None, &mut progress);
        assert!(matches!(result, Err(DatabaseError::Cancelled)));
        assert!(!db.is_loaded());
        assert_eq!(progress.stages.first(), Some(&Stage::HeaderSniff));
    }

    #[test]
    fn test_key_file_from_reader() {
        let mut db = Database::new();
        db.create_v4("Keyed");
        db.set_kdf(KdfKind::AesKdf).unwrap();
        db.set_rounds(10).unwrap();
        let key = b"arbitrary key file contents that get hashed".to_vec();
        db.set_credentials(None, Some(&key)).unwrap();
        let data = saved(&db);

        let mut loaded = Database::new();
        let mut source = key.as_slice();
        loaded
            .load_data(Cursor::new(data), None, Some(&mut source), &mut NoProgress)
            .unwrap();
        assert_eq!(loaded.name(), Some("Keyed"));
    }

    #[test]
    fn test_save_file_atomic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.kdbx");
        let db = create_test_database();

        db.save_file(&path, &mut NoProgress).unwrap();
        assert!(path.exists());
        assert!(!temp_path(&path).exists());
        let first = fs::read(&path).unwrap();

        // A cancelled save leaves the existing file alone
        let mut progress = RecordingProgress {
            cancel_at: Some(Stage::BodyEncrypt),
            ..Default::default()
        };
        let result = db.save_file(&path, &mut progress);
        assert!(matches!(result, Err(DatabaseError::Cancelled)));
        assert_eq!(fs::read(&path).unwrap(), first);
        assert!(!temp_path(&path).exists());

        let mut loaded = Database::new();
        loaded.load_file(&path, Some("abc123"), None, &mut NoProgress).unwrap();
        assert_eq!(loaded.name(), Some("Test Database"));
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(temp_path(Path::new("/a/b.kdbx")), PathBuf::from("/a/b.kdbx.tmp"));
    }

    #[test]
    fn test_clear_deletes_scratch_files() {
        let config = DatabaseConfig::default().with_memory_threshold(8);
        let mut db = Database::with_config(config);
        db.create_v4("Scratch");
        let engine = db.engine_mut().unwrap();
        engine.binaries_mut().add_bytes(false, &[7u8; 64]).unwrap();
        let scratch = engine.binaries().scratch_path().unwrap().to_path_buf();
        assert!(scratch.exists());

        db.close_and_clear();
        assert!(!scratch.exists());
        assert!(db.engine().is_none());
    }
}
