//! RocksDB-backed stroke store.
//!
//! Column families:
//! - `strokes` — one row per stroke, keyed by `room prefix · seq` (LZ4 compressed bincode)
//! - `rooms`   — per-room metadata (stroke count, last sequence number)
//!
//! The room prefix is a big-endian `u64` length followed by the room name,
//! so `"R1"` never prefix-matches `"R10"`. The sequence number is global
//! and monotonic across rooms; a prefix scan therefore yields a room's
//! strokes in insertion order.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use sketchroom_core::{unix_millis, NewStroke, RoomId, Stroke};

use super::{StoreError, StrokeStorage};

const CF_STROKES: &str = "strokes";
const CF_ROOMS: &str = "rooms";

const COLUMN_FAMILIES: &[&str] = &[CF_STROKES, CF_ROOMS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sketchroom_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Per-room bookkeeping stored in the `rooms` column family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMetadata {
    pub room_id: RoomId,
    /// Strokes currently stored
    pub stroke_count: u64,
    /// Highest sequence number ever assigned in this room
    pub last_seq: u64,
    /// Times the room was cleared
    pub clears: u64,
    /// Unix milliseconds
    pub updated_at: i64,
}

impl RoomMetadata {
    fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            stroke_count: 0,
            last_seq: 0,
            clears: 0,
            updated_at: unix_millis(),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// RocksDB stroke store.
pub struct StrokeStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Next sequence number to hand out
    sequence: AtomicU64,
    /// Serializes metadata read-modify-write between inserts and clears
    write_lock: Mutex<()>,
}

impl StrokeStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let sequence = Self::recover_sequence(&db)?;
        log::info!(
            "Opened stroke store at {} (next seq {sequence})",
            config.path.display()
        );

        Ok(Self {
            db,
            config,
            sequence: AtomicU64::new(sequence),
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_STROKES => {
                // Values are already LZ4 compressed
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(4);
            }
            CF_ROOMS => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Next free sequence number: one past the highest `last_seq` of any room.
    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>) -> Result<u64, StoreError> {
        let Some(cf) = db.cf_handle(CF_ROOMS) else {
            return Ok(1);
        };
        let mut next = 1;
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let meta = RoomMetadata::decode(&value)?;
            next = next.max(meta.last_seq + 1);
        }
        Ok(next)
    }

    // ─── Queries ──────────────────────────────────────────────────────

    pub fn room_metadata(&self, room_id: &RoomId) -> Result<Option<RoomMetadata>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        match self.db.get_cf(&cf, room_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(RoomMetadata::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every room that has ever held a stroke.
    pub fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        let mut rooms = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            rooms.push(RoomMetadata::decode(&value)?.room_id);
        }
        Ok(rooms)
    }

    /// Force a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn room_prefix(room_id: &RoomId) -> Vec<u8> {
        let name = room_id.as_str().as_bytes();
        let mut prefix = Vec::with_capacity(8 + name.len() + 8);
        // usize never exceeds u64, so the length is exact.
        prefix.extend_from_slice(&(name.len() as u64).to_be_bytes());
        prefix.extend_from_slice(name);
        prefix
    }

    fn stroke_key(room_id: &RoomId, seq: u64) -> Vec<u8> {
        let mut key = Self::room_prefix(room_id);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn encode_stroke(stroke: &Stroke) -> Result<Vec<u8>, StoreError> {
        let raw = bincode::serde::encode_to_vec(stroke, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&raw))
    }

    fn decode_stroke(bytes: &[u8]) -> Result<Stroke, StoreError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::CompressionError(e.to_string()))?;
        let (stroke, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(stroke)
    }

    /// Keys of every stroke row in the room, in sequence order.
    fn room_keys(&self, room_id: &RoomId) -> Result<Vec<Box<[u8]>>, StoreError> {
        let cf = self.cf(CF_STROKES)?;
        let prefix = Self::room_prefix(room_id);
        let mut keys = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl StrokeStorage for StrokeStore {
    fn insert(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError> {
        stroke.validate()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let stored = stroke.into_stroke(Uuid::new_v4().to_string(), room_id.clone(), unix_millis());

        let mut meta = self
            .room_metadata(room_id)?
            .unwrap_or_else(|| RoomMetadata::new(room_id.clone()));
        meta.stroke_count += 1;
        meta.last_seq = seq;
        meta.updated_at = stored.created_at;

        let cf_strokes = self.cf(CF_STROKES)?;
        let cf_rooms = self.cf(CF_ROOMS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_strokes, Self::stroke_key(room_id, seq), Self::encode_stroke(&stored)?);
        batch.put_cf(&cf_rooms, room_id.as_str().as_bytes(), meta.encode()?);
        self.db.write_opt(batch, &self.write_opts())?;

        log::debug!("Stored stroke {} in room {room_id} (seq {seq})", stored.id);
        Ok(stored)
    }

    fn load(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError> {
        let cf = self.cf(CF_STROKES)?;
        let prefix = Self::room_prefix(room_id);
        let mut strokes = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            strokes.push(Self::decode_stroke(&value)?);
        }
        Ok(strokes)
    }

    fn clear(&self, room_id: &RoomId) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let keys = self.room_keys(room_id)?;
        let Some(mut meta) = self.room_metadata(room_id)? else {
            return Ok(0);
        };
        meta.stroke_count = 0;
        meta.clears += 1;
        meta.updated_at = unix_millis();

        let cf_strokes = self.cf(CF_STROKES)?;
        let cf_rooms = self.cf(CF_ROOMS)?;
        let mut batch = WriteBatch::default();
        for key in &keys {
            batch.delete_cf(&cf_strokes, key);
        }
        batch.put_cf(&cf_rooms, room_id.as_str().as_bytes(), meta.encode()?);
        self.db.write_opt(batch, &self.write_opts())?;

        log::info!("Cleared {} strokes from room {room_id}", keys.len());
        Ok(keys.len() as u64)
    }
}
