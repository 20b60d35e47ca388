//! Session key dictionary (C8a): maps field-name strings to 16-bit
//! indices so repeated keys collapse to two bytes on the wire, plus the
//! `GDCT` binary container and dictionary-compressed frame codec.

use std::collections::HashMap;

use integer_encoding::VarInt;
use parking_lot::RwLock;

use crate::canon::{canonicalize_loose, KeyDictionary};
use crate::error::{GlyphError, Result};
use crate::types::MapEntry;

/// Sentinel returned by [`StreamDict::lookup_or_add`] when a key can't be
/// added right now (frozen, or at capacity): encoders fall back to an
/// inline string for that key.
pub const DICT_NOT_ADDED: u16 = 0xFFFF;

pub const DEFAULT_CAPACITY: usize = 4096;
pub const DEFAULT_LEARNING_FRAMES: u32 = 10;

/// Tunables for a [`StreamDict`].
#[derive(Debug, Clone, Copy)]
pub struct DictOptions {
    pub capacity: usize,
    pub learning_frames: u32,
}

impl Default for DictOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            learning_frames: DEFAULT_LEARNING_FRAMES,
        }
    }
}

struct Inner {
    entries: Vec<String>,
    index_of: HashMap<String, u16>,
    frozen: bool,
    frames_seen: u32,
    version: u16,
}

/// A versioned, capacity-capped session dictionary. Implements
/// [`KeyDictionary`] so the canonical emitter and parser can use it for
/// compact-key round-tripping without depending on this module directly.
///
/// All mutation happens through `&self` (an internal lock), since
/// `KeyDictionary::lookup_index` takes `&self` — readers (the
/// steady-state path once learning ends) take a shared lock; inserts take
/// an exclusive one.
pub struct StreamDict {
    session_id: u64,
    options: DictOptions,
    inner: RwLock<Inner>,
}

impl StreamDict {
    pub fn new(session_id: u64) -> Self {
        Self::with_options(session_id, DictOptions::default())
    }

    pub fn with_options(session_id: u64, options: DictOptions) -> Self {
        Self {
            session_id,
            options,
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                index_of: HashMap::new(),
                frozen: false,
                frames_seen: 0,
                version: 0,
            }),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn version(&self) -> u16 {
        self.inner.read().version
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the learning phase early. Idempotent.
    pub fn freeze(&self) {
        let mut g = self.inner.write();
        if !g.frozen {
            g.frozen = true;
            tracing::debug!(session_id = self.session_id, entries = g.entries.len(), "dictionary frozen");
        }
    }

    /// Count one processed frame toward the learning-phase budget,
    /// auto-freezing once it's exhausted.
    pub fn advance_frame(&self) {
        let mut g = self.inner.write();
        if g.frozen {
            return;
        }
        g.frames_seen += 1;
        if g.frames_seen >= self.options.learning_frames {
            g.frozen = true;
            tracing::debug!(session_id = self.session_id, "dictionary learning phase ended");
        }
    }

    /// Resolve `key` to its index, inserting it if unseen, learning is
    /// still open, and there's capacity left. Returns [`DICT_NOT_ADDED`]
    /// when the key is unseen but can't be added right now.
    pub fn lookup_or_add(&self, key: &str) -> u16 {
        if let Some(&idx) = self.inner.read().index_of.get(key) {
            return idx;
        }
        let mut g = self.inner.write();
        if let Some(&idx) = g.index_of.get(key) {
            return idx;
        }
        if g.frozen || g.entries.len() >= self.options.capacity {
            return DICT_NOT_ADDED;
        }
        let idx = g.entries.len() as u16;
        g.entries.push(key.to_string());
        g.index_of.insert(key.to_string(), idx);
        g.version = g.version.wrapping_add(1);
        idx
    }
}

impl KeyDictionary for StreamDict {
    fn lookup_index(&self, key: &str) -> Option<u16> {
        self.inner.read().index_of.get(key).copied()
    }

    fn resolve_index(&self, idx: u16) -> Option<String> {
        self.inner.read().entries.get(idx as usize).cloned()
    }
}

const GDCT_MAGIC: &[u8; 4] = b"GDCT";
const GDCT_FORMAT_VERSION: u16 = 1;

fn fnv1a32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x01000193;
    let mut hash = OFFSET_BASIS;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Serialize a dictionary's current entries to the `GDCT` binary form:
/// magic, LE format version, LE entry count, LE session id, LE FNV-1a
/// checksum of the entry bytes, then length-prefixed UTF-8 entries.
pub fn serialize_gdct(dict: &StreamDict) -> Vec<u8> {
    let g = dict.inner.read();
    let mut body = Vec::new();
    for e in &g.entries {
        let bytes = e.as_bytes();
        body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(bytes);
    }
    let checksum = fnv1a32(&body);

    let mut out = Vec::with_capacity(4 + 2 + 2 + 8 + 4 + body.len());
    out.extend_from_slice(GDCT_MAGIC);
    out.extend_from_slice(&GDCT_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(g.entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&dict.session_id.to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Deserialize a `GDCT` blob into a fresh, already-frozen `StreamDict`
/// (a deserialized dictionary represents a completed learning phase, not
/// a fresh session). Verifies magic and checksum.
pub fn deserialize_gdct(bytes: &[u8]) -> Result<StreamDict> {
    const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 4;
    if bytes.len() < HEADER_LEN || &bytes[0..4] != GDCT_MAGIC {
        return Err(GlyphError::InvalidDictMagic);
    }
    let mut pos = 4;
    let _format_version = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap());
    pos += 2;
    let count = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap()) as usize;
    pos += 2;
    let session_id = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let checksum = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let body = &bytes[pos..];
    if fnv1a32(body) != checksum {
        return Err(GlyphError::ChecksumMismatch);
    }

    let mut entries = Vec::with_capacity(count);
    let mut cursor = 0usize;
    for _ in 0..count {
        let len = u32::from_le_bytes(
            body.get(cursor..cursor + 4)
                .ok_or(GlyphError::InvalidDictMagic)?
                .try_into()
                .unwrap(),
        ) as usize;
        cursor += 4;
        let raw = body.get(cursor..cursor + len).ok_or(GlyphError::InvalidDictMagic)?;
        let s = String::from_utf8(raw.to_vec()).map_err(|_| GlyphError::InvalidDictMagic)?;
        cursor += len;
        entries.push(s);
    }

    let dict = StreamDict::new(session_id);
    {
        let mut g = dict.inner.write();
        for (i, e) in entries.into_iter().enumerate() {
            g.index_of.insert(e.clone(), i as u16);
            g.entries.push(e);
        }
        g.frozen = true;
        g.version = 1;
    }
    Ok(dict)
}

/// Flags byte at the head of a dictionary-compressed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    pub includes_dict: bool,
    pub dict_reset: bool,
    pub compact_keys: bool,
}

impl FrameFlags {
    fn to_byte(self) -> u8 {
        (self.includes_dict as u8) | ((self.dict_reset as u8) << 1) | ((self.compact_keys as u8) << 2)
    }

    fn from_byte(b: u8) -> Self {
        Self {
            includes_dict: b & 0b001 != 0,
            dict_reset: b & 0b010 != 0,
            compact_keys: b & 0b100 != 0,
        }
    }
}

/// A decoded dictionary-compressed frame.
#[derive(Debug, Clone)]
pub struct DictFrame {
    pub session_id: u64,
    pub seq: u64,
    pub dict_version: u16,
    pub flags: FrameFlags,
    pub entries: Vec<MapEntry>,
    /// Present when `flags.includes_dict` was set: the dictionary shipped
    /// inline with this frame, already merged into what the caller should
    /// use for subsequent compact-key resolution.
    pub embedded_dict: Option<StreamDict>,
}

fn write_varint(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 10];
    let n = v.encode_var(&mut buf);
    out.extend_from_slice(&buf[..n]);
}

fn bad_frame(message: impl Into<String>) -> GlyphError {
    GlyphError::BadToken {
        path: "frame".to_string(),
        message: message.into(),
    }
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    let v = u16::from_le_bytes(
        bytes
            .get(*pos..*pos + 2)
            .ok_or_else(|| bad_frame("truncated u16"))?
            .try_into()
            .unwrap(),
    );
    *pos += 2;
    Ok(v)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let v = u32::from_le_bytes(
        bytes
            .get(*pos..*pos + 4)
            .ok_or_else(|| bad_frame("truncated u32"))?
            .try_into()
            .unwrap(),
    );
    *pos += 4;
    Ok(v)
}

/// Encode a flat key/value frame, compressing keys against `dict` when
/// `flags.compact_keys` is set. Values are always inline canonical text
/// (compression is a key-name concern only, per spec).
pub fn encode_frame(entries: &[MapEntry], seq: u64, dict: &StreamDict, flags: FrameFlags) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(flags.to_byte());
    write_varint(&mut out, dict.session_id());
    write_varint(&mut out, seq);
    out.extend_from_slice(&dict.version().to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());

    if flags.includes_dict {
        let blob = serialize_gdct(dict);
        out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        out.extend_from_slice(&blob);
    }

    for e in entries {
        let compact_idx = flags.compact_keys.then(|| dict.lookup_index(&e.key)).flatten();
        match compact_idx {
            Some(idx) => {
                out.push(0x80);
                out.extend_from_slice(&idx.to_le_bytes());
            }
            None => {
                out.push(0x00);
                let kb = e.key.as_bytes();
                out.extend_from_slice(&(kb.len() as u32).to_le_bytes());
                out.extend_from_slice(kb);
            }
        }
        let text = canonicalize_loose(&e.value)?;
        let vb = text.as_bytes();
        out.extend_from_slice(&(vb.len() as u32).to_le_bytes());
        out.extend_from_slice(vb);
    }
    Ok(out)
}

/// Decode a frame produced by [`encode_frame`]. `dict` resolves any
/// `0x80`-tagged compact key not satisfied by an embedded dictionary.
pub fn decode_frame(bytes: &[u8], dict: &StreamDict) -> Result<DictFrame> {
    let mut pos = 0usize;
    let flags = FrameFlags::from_byte(*bytes.first().ok_or_else(|| bad_frame("truncated flags"))?);
    pos += 1;
    let (session_id, n) = u64::decode_var(&bytes[pos..]).ok_or_else(|| bad_frame("truncated session id"))?;
    pos += n;
    let (seq, n) = u64::decode_var(&bytes[pos..]).ok_or_else(|| bad_frame("truncated seq"))?;
    pos += n;
    let dict_version = read_u16(bytes, &mut pos)?;
    let entry_count = read_u16(bytes, &mut pos)? as usize;

    let mut embedded_dict = None;
    if flags.includes_dict {
        let len = read_u32(bytes, &mut pos)? as usize;
        let blob = bytes.get(pos..pos + len).ok_or_else(|| bad_frame("truncated dict blob"))?;
        pos += len;
        embedded_dict = Some(deserialize_gdct(blob)?);
    }
    let active_dict: &StreamDict = embedded_dict.as_ref().unwrap_or(dict);

    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let tag = *bytes.get(pos).ok_or_else(|| bad_frame("truncated key tag"))?;
        pos += 1;
        let key = if tag == 0x80 {
            let idx = read_u16(bytes, &mut pos)?;
            active_dict
                .resolve_index(idx)
                .ok_or_else(|| bad_frame(format!("unresolvable dict index {idx}")))?
        } else {
            let len = read_u32(bytes, &mut pos)? as usize;
            let kb = bytes.get(pos..pos + len).ok_or_else(|| bad_frame("truncated key bytes"))?;
            pos += len;
            String::from_utf8(kb.to_vec()).map_err(|_| bad_frame("invalid utf-8 key"))?
        };
        let vlen = read_u32(bytes, &mut pos)? as usize;
        let vb = bytes.get(pos..pos + vlen).ok_or_else(|| bad_frame("truncated value bytes"))?;
        pos += vlen;
        let text = std::str::from_utf8(vb).map_err(|_| bad_frame("invalid utf-8 value"))?;
        let value = crate::parser::parse(text)?;
        entries.push(MapEntry::new(key, value));
    }

    Ok(DictFrame {
        session_id,
        seq,
        dict_version,
        flags,
        entries,
        embedded_dict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GValue;

    #[test]
    fn learning_phase_freezes_after_default_frame_budget() {
        let dict = StreamDict::new(1);
        for _ in 0..DEFAULT_LEARNING_FRAMES {
            assert!(!dict.is_frozen());
            dict.advance_frame();
        }
        assert!(dict.is_frozen());
    }

    #[test]
    fn frozen_dict_returns_not_added_sentinel_for_new_keys() {
        let dict = StreamDict::new(1);
        dict.freeze();
        assert_eq!(dict.lookup_or_add("name"), DICT_NOT_ADDED);
    }

    #[test]
    fn capacity_cap_falls_back_to_sentinel() {
        let dict = StreamDict::with_options(1, DictOptions { capacity: 2, learning_frames: 100 });
        assert_eq!(dict.lookup_or_add("a"), 0);
        assert_eq!(dict.lookup_or_add("b"), 1);
        assert_eq!(dict.lookup_or_add("c"), DICT_NOT_ADDED);
        // Already-known keys still resolve even once the dict is full.
        assert_eq!(dict.lookup_or_add("a"), 0);
    }

    #[test]
    fn gdct_roundtrip_preserves_entries_and_session_id() {
        let dict = StreamDict::new(42);
        dict.lookup_or_add("name");
        dict.lookup_or_add("age");
        let blob = serialize_gdct(&dict);
        let restored = deserialize_gdct(&blob).unwrap();
        assert_eq!(restored.session_id(), 42);
        assert_eq!(restored.resolve_index(0), Some("name".to_string()));
        assert_eq!(restored.resolve_index(1), Some("age".to_string()));
        assert!(restored.is_frozen());
    }

    #[test]
    fn gdct_rejects_corrupted_checksum() {
        let dict = StreamDict::new(1);
        dict.lookup_or_add("x");
        let mut blob = serialize_gdct(&dict);
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(deserialize_gdct(&blob), Err(GlyphError::ChecksumMismatch)));
    }

    #[test]
    fn frame_roundtrip_with_compact_keys() {
        let dict = StreamDict::new(7);
        dict.lookup_or_add("name");
        let entries = vec![MapEntry::new("name", GValue::str("Alice"))];
        let flags = FrameFlags { includes_dict: false, dict_reset: false, compact_keys: true };
        let bytes = encode_frame(&entries, 3, &dict, flags).unwrap();
        let frame = decode_frame(&bytes, &dict).unwrap();
        assert_eq!(frame.seq, 3);
        assert_eq!(frame.session_id, 7);
        assert_eq!(frame.entries, entries);
    }

    #[test]
    fn frame_with_embedded_dict_is_self_contained() {
        let dict = StreamDict::new(9);
        dict.lookup_or_add("id");
        let entries = vec![MapEntry::new("id", GValue::int(5))];
        let flags = FrameFlags { includes_dict: true, dict_reset: false, compact_keys: true };
        let bytes = encode_frame(&entries, 1, &dict, flags).unwrap();

        // A fresh, empty dict on the decode side still resolves the key
        // because the frame carries its own dictionary snapshot.
        let fresh = StreamDict::new(0);
        let frame = decode_frame(&bytes, &fresh).unwrap();
        assert_eq!(frame.entries, entries);
        assert!(frame.embedded_dict.is_some());
    }

    #[test]
    fn scenario_s6_second_frame_shrinks_once_keys_are_learned() {
        let dict = StreamDict::new(1);
        let entries = vec![MapEntry::new("role", GValue::str("user")), MapEntry::new("content", GValue::str("hi"))];
        let plain = FrameFlags::default();
        let frame1 = encode_frame(&entries, 1, &dict, plain).unwrap();

        dict.lookup_or_add("role");
        dict.lookup_or_add("content");
        let compact = FrameFlags { compact_keys: true, ..FrameFlags::default() };
        let frame2 = encode_frame(&entries, 2, &dict, compact).unwrap();

        assert!(frame2.len() < frame1.len());
        let savings = frame1.len() - frame2.len();
        let min_expected: usize = entries.iter().map(|e| e.key.len()).sum();
        assert!(savings >= min_expected, "savings {savings} should be at least {min_expected}");
    }
}
