//! Package-version manifests: the binary record stream and the JSON-lines
//! list served next to it.

use crate::error::Error;
use crate::model::{AssetCategory, AssetDescriptor};
use serde::Deserialize;

pub const BINARY_MAGIC: &[u8; 4] = b"PKGV";
pub const BINARY_VERSION: u16 = 1;

const FLAG_HAS_XXH64: u8 = 0b0001;
const FLAG_IS_PATCH: u8 = 0b0010;
const FLAG_FORCE_PERSISTENT: u8 = 0b0100;
const FLAG_FORCE_STREAMING: u8 = 0b1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgVersion {
    /// Build time of the manifest, unix seconds.
    pub timestamp: i64,
    pub entries: Vec<AssetDescriptor>,
}

/// Decode either shape, sniffing the binary magic.
pub fn decode(manifest: &str, data: &[u8]) -> Result<Vec<AssetDescriptor>, Error> {
    if data.starts_with(BINARY_MAGIC) {
        decode_binary(manifest, data).map(|pkg| pkg.entries)
    } else {
        decode_json_lines(manifest, data)
    }
}

struct ByteReader<'a> {
    manifest: &'a str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(Error::format(
                self.manifest,
                format!("unexpected end of stream at offset {}", self.pos),
            )),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, Error> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String, Error> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::format(self.manifest, format!("invalid path string: {}", e)))
    }
}

pub fn decode_binary(manifest: &str, data: &[u8]) -> Result<PkgVersion, Error> {
    let mut reader = ByteReader {
        manifest,
        data,
        pos: 0,
    };

    if reader.take(BINARY_MAGIC.len())? != BINARY_MAGIC {
        return Err(Error::format(manifest, "bad magic"));
    }
    let version = reader.u16()?;
    if version != BINARY_VERSION {
        return Err(Error::format(
            manifest,
            format!("unsupported format version {}", version),
        ));
    }
    let timestamp = reader.i64()?;
    let count = reader.u32()? as usize;

    // count comes from the stream, don't trust it for preallocation
    let mut entries = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let remote_name = reader.string()?;
        let persistent = reader.string()?;
        let size = reader.u64()?;
        let md5 = reader.array::<16>()?.to_vec();
        let flags = reader.u8()?;
        let xxh64 = if flags & FLAG_HAS_XXH64 != 0 {
            Some(reader.array::<8>()?.to_vec())
        } else {
            None
        };

        entries.push(AssetDescriptor {
            category: AssetCategory::from_path(&remote_name),
            remote_name_persistent: if persistent.is_empty() {
                remote_name.clone()
            } else {
                persistent
            },
            remote_name,
            size,
            md5,
            xxh64,
            is_patch: flags & FLAG_IS_PATCH != 0,
            force_persistent: flags & FLAG_FORCE_PERSISTENT != 0,
            force_streaming: flags & FLAG_FORCE_STREAMING != 0,
            remote_url: None,
            local_path: None,
        });
    }

    if reader.pos != data.len() {
        return Err(Error::format(
            manifest,
            format!("{} trailing bytes after {} records", data.len() - reader.pos, count),
        ));
    }

    Ok(PkgVersion { timestamp, entries })
}

/// Encode entries in the binary layout. Mirror tooling and tests use this
/// to produce manifests.
pub fn encode_binary(timestamp: i64, entries: &[AssetDescriptor]) -> Vec<u8> {
    fn put_str(out: &mut Vec<u8>, s: &str) {
        let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(bytes);
    }

    let mut out = Vec::new();
    out.extend_from_slice(BINARY_MAGIC);
    out.extend_from_slice(&BINARY_VERSION.to_le_bytes());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for entry in entries {
        put_str(&mut out, &entry.remote_name);
        if entry.remote_name_persistent == entry.remote_name {
            put_str(&mut out, "");
        } else {
            put_str(&mut out, &entry.remote_name_persistent);
        }
        out.extend_from_slice(&entry.size.to_le_bytes());
        let mut md5 = [0u8; 16];
        let n = entry.md5.len().min(16);
        md5[..n].copy_from_slice(&entry.md5[..n]);
        out.extend_from_slice(&md5);

        let xxh64 = entry.xxh64.as_ref().filter(|x| x.len() == 8);
        let mut flags = 0u8;
        if xxh64.is_some() {
            flags |= FLAG_HAS_XXH64;
        }
        if entry.is_patch {
            flags |= FLAG_IS_PATCH;
        }
        if entry.force_persistent {
            flags |= FLAG_FORCE_PERSISTENT;
        }
        if entry.force_streaming {
            flags |= FLAG_FORCE_STREAMING;
        }
        out.push(flags);
        if let Some(xxh64) = xxh64 {
            out.extend_from_slice(xxh64);
        }
    }
    out
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PkgVersionLine {
    remote_name: String,
    #[serde(default)]
    remote_name_persistent: Option<String>,
    #[serde(default)]
    md5: String,
    #[serde(default, rename = "xxh64hash")]
    xxh64: Option<String>,
    file_size: u64,
    #[serde(default)]
    is_patch: bool,
    #[serde(default, rename = "isForceStoreInPersistent")]
    force_persistent: bool,
    #[serde(default, rename = "isForceStoreInStreaming")]
    force_streaming: bool,
}

fn decode_hex(manifest: &str, line: usize, field: &str, value: &str) -> Result<Vec<u8>, Error> {
    hex::decode(value.trim()).map_err(|e| {
        Error::format(manifest, format!("line {}: bad {} '{}': {}", line, field, value, e))
    })
}

pub fn decode_json_lines(manifest: &str, data: &[u8]) -> Result<Vec<AssetDescriptor>, Error> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::format(manifest, format!("not UTF-8: {}", e)))?;

    let mut entries = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            continue;
        }
        let record: PkgVersionLine = serde_json::from_str(line)
            .map_err(|e| Error::format(manifest, format!("line {}: {}", i + 1, e)))?;

        let md5 = decode_hex(manifest, i + 1, "md5", &record.md5)?;
        let xxh64 = match record.xxh64.as_deref().filter(|x| !x.trim().is_empty()) {
            Some(x) => Some(decode_hex(manifest, i + 1, "xxh64hash", x)?),
            None => None,
        };

        let remote_name_persistent = record
            .remote_name_persistent
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| record.remote_name.clone());

        entries.push(AssetDescriptor {
            category: AssetCategory::from_path(&record.remote_name),
            remote_name: record.remote_name,
            remote_name_persistent,
            size: record.file_size,
            md5,
            xxh64,
            is_patch: record.is_patch,
            force_persistent: record.force_persistent,
            force_streaming: record.force_streaming,
            remote_url: None,
            local_path: None,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<AssetDescriptor> {
        let mut plain = AssetDescriptor::new("GenshinImpact_Data/level0", 42, vec![0xAB; 16]);
        plain.xxh64 = Some(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let mut patch = AssetDescriptor::new(
            "GenshinImpact_Data/StreamingAssets/AssetBundles/blocks/00/1.blk",
            7,
            vec![0xCD; 16],
        );
        patch.remote_name_persistent = "GenshinImpact_Data/Persistent/AssetBundles/blocks/00/1.blk".into();
        patch.is_patch = true;
        patch.force_persistent = true;
        vec![plain, patch]
    }

    #[test]
    fn test_binary_decodes_what_was_encoded() {
        let entries = sample_entries();
        let data = encode_binary(1_700_000_000, &entries);
        let pkg = decode_binary("pkg_version.bin", &data).unwrap();
        assert_eq!(pkg.timestamp, 1_700_000_000);
        assert_eq!(pkg.entries, entries);
    }

    #[test]
    fn test_binary_truncated_is_format_error() {
        let data = encode_binary(0, &sample_entries());
        let err = decode_binary("pkg_version.bin", &data[..data.len() - 3]).unwrap_err();
        match err {
            Error::Format { manifest, .. } => assert_eq!(manifest, "pkg_version.bin"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_binary_bad_magic_and_version() {
        assert!(matches!(
            decode_binary("m", b"NOPE\x01\x00"),
            Err(Error::Format { .. })
        ));

        let mut data = encode_binary(0, &[]);
        data[4] = 9;
        let err = decode_binary("m", &data).unwrap_err();
        assert!(err.to_string().contains("unsupported format version 9"));
    }

    #[test]
    fn test_binary_huge_count_does_not_allocate_blindly() {
        let mut data = encode_binary(0, &[]);
        let len = data.len();
        data[len - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode_binary("m", &data), Err(Error::Format { .. })));
    }

    #[test]
    fn test_json_lines() {
        let text = concat!(
            "{\"remoteName\":\"GenshinImpact.exe\",\"md5\":\"00112233445566778899aabbccddeeff\",\"fileSize\":10}\n",
            "\n",
            "{\"remoteName\":\"Data/x.pck\",\"remoteNamePersistent\":\"Persistent/x.pck\",\"md5\":\"00112233445566778899aabbccddeeff\",",
            "\"xxh64hash\":\"0102030405060708\",\"fileSize\":3,\"isPatch\":true,\"isForceStoreInPersistent\":true}\n",
        );
        let entries = decode_json_lines("pkg_version", text.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].remote_name_persistent, "GenshinImpact.exe");
        assert_eq!(entries[0].md5.len(), 16);
        assert!(entries[0].xxh64.is_none());
        assert_eq!(entries[1].xxh64.as_deref(), Some(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]));
        assert!(entries[1].is_patch && entries[1].force_persistent);
        assert_eq!(entries[1].category, AssetCategory::Audio);
    }

    #[test]
    fn test_json_lines_reports_line_number() {
        let text = "{\"remoteName\":\"a\",\"md5\":\"00\",\"fileSize\":1}\n{broken\n";
        let err = decode_json_lines("pkg_version", text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);

        let bad_hex = "{\"remoteName\":\"a\",\"md5\":\"zz\",\"fileSize\":1}\n";
        assert!(matches!(
            decode_json_lines("pkg_version", bad_hex.as_bytes()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_decode_sniffs_format() {
        let entries = sample_entries();
        let binary = encode_binary(0, &entries);
        assert_eq!(decode("m", &binary).unwrap(), entries);
        assert!(decode("m", b"").unwrap().is_empty());
    }
}
