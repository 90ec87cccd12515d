//! Native NTFS USN journal backend.
//!
//! Reads change records with `FSCTL_READ_USN_JOURNAL` against a raw volume
//! handle and resolves parent paths through `OpenFileById`, caching the
//! reference-number → path mapping to keep syscalls off the hot path.
//! Opening a volume requires backup-operator privileges.

use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_ID_DESCRIPTOR, FILE_ID_DESCRIPTOR_0,
    FILE_ID_TYPE, FILE_NAME_NORMALIZED, FILE_SHARE_READ, FILE_SHARE_WRITE,
    GetFinalPathNameByHandleW, OPEN_EXISTING, OpenFileById,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::Win32::System::Ioctl::{FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_USN_JOURNAL};
use windows::core::PCWSTR;

use engram_model::{JournalBatch, JournalMetadata, RawJournalRecord, ReasonFlags};

use crate::error::{EngramError, Result};
use crate::journal::JournalSource;

const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
const READ_BUFFER_BYTES: usize = 256 * 1024;

const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_INVALID_PARAMETER: i32 = 87;
const ERROR_JOURNAL_DELETE_IN_PROGRESS: i32 = 1178;
const ERROR_JOURNAL_NOT_ACTIVE: i32 = 1179;
const ERROR_JOURNAL_ENTRY_DELETED: i32 = 1181;

/// `READ_USN_JOURNAL_DATA_V0` input structure.
#[repr(C)]
struct ReadUsnJournalDataV0 {
    start_usn: i64,
    reason_mask: u32,
    return_only_on_close: u32,
    timeout: u64,
    bytes_to_wait_for: u64,
    usn_journal_id: u64,
}

struct VolumeHandle {
    handle: HANDLE,
}

// NTFS volume handles are kernel objects and safe to use across threads;
// all mutation goes through DeviceIoControl.
unsafe impl Send for VolumeHandle {}
unsafe impl Sync for VolumeHandle {}

impl Drop for VolumeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

struct Inner {
    volume: String,
    drive_prefix: String,
    handle: VolumeHandle,
    journal_id: u64,
    parent_paths: Mutex<HashMap<u64, PathBuf>>,
}

pub struct UsnJournalSource {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UsnJournalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .inner
            .parent_paths
            .lock()
            .map(|c| c.len())
            .unwrap_or(0);
        f.debug_struct("UsnJournalSource")
            .field("volume", &self.inner.volume)
            .field("journal_id", &self.inner.journal_id)
            .field("cached_parent_paths", &cached)
            .finish()
    }
}

fn classify(volume: &str, context: &str, err: windows::core::Error) -> EngramError {
    let code = err.code().0 & 0xFFFF;
    match code as i32 {
        ERROR_ACCESS_DENIED => EngramError::AccessDenied(format!(
            "{context} on {volume}: {err} (requires backup privileges)"
        )),
        ERROR_INVALID_PARAMETER | ERROR_JOURNAL_ENTRY_DELETED => EngramError::InvalidCursor {
            volume: volume.to_string(),
            message: format!("{context}: {err}"),
        },
        ERROR_JOURNAL_DELETE_IN_PROGRESS | ERROR_JOURNAL_NOT_ACTIVE => {
            EngramError::JournalUnavailable {
                volume: volume.to_string(),
                message: format!("{context}: {err}"),
            }
        }
        _ => EngramError::JournalRead {
            volume: volume.to_string(),
            message: format!("{context}: {err}"),
        },
    }
}

fn open_volume(volume: &str) -> Result<VolumeHandle> {
    let drive = volume.trim_end_matches(['\\', '/']).trim_end_matches(':');
    let path: Vec<u16> = format!("\\\\.\\{drive}:")
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    let handle = unsafe {
        CreateFileW(
            PCWSTR(path.as_ptr()),
            0x8000_0000, // GENERIC_READ
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            None,
        )
    }
    .map_err(|err| classify(volume, "open volume", err))?;

    Ok(VolumeHandle { handle })
}

fn query_journal(volume: &str, vol: &VolumeHandle) -> Result<JournalMetadata> {
    // USN_JOURNAL_DATA_V0 is 56 bytes; we need the first three fields.
    let mut buffer = [0u8; 56];
    let mut bytes_returned: u32 = 0;

    unsafe {
        DeviceIoControl(
            vol.handle,
            FSCTL_QUERY_USN_JOURNAL,
            None,
            0,
            Some(buffer.as_mut_ptr() as *mut _),
            buffer.len() as u32,
            Some(&mut bytes_returned),
            None,
        )
    }
    .map_err(|err| classify(volume, "query journal", err))?;

    if (bytes_returned as usize) < 24 {
        return Err(EngramError::JournalUnavailable {
            volume: volume.to_string(),
            message: format!("journal query returned {bytes_returned} bytes"),
        });
    }

    Ok(JournalMetadata {
        journal_id: u64::from_le_bytes(buffer[0..8].try_into().expect("fixed slice")),
        first_usn: i64::from_le_bytes(buffer[8..16].try_into().expect("fixed slice")),
        next_usn: i64::from_le_bytes(buffer[16..24].try_into().expect("fixed slice")),
    })
}

fn filetime_to_utc(filetime: i64) -> DateTime<Utc> {
    // FILETIME counts 100 ns intervals since 1601-01-01.
    const EPOCH_DELTA_100NS: i64 = 116_444_736_000_000_000;
    let unix_100ns = filetime - EPOCH_DELTA_100NS;
    let secs = unix_100ns.div_euclid(10_000_000);
    let nanos = (unix_100ns.rem_euclid(10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
}

struct ParsedRecord {
    usn: i64,
    frn: u64,
    parent_frn: u64,
    reasons: ReasonFlags,
    timestamp: DateTime<Utc>,
    is_directory: bool,
    name: String,
}

fn parse_record_v2(data: &[u8]) -> Option<ParsedRecord> {
    if data.len() < 64 {
        return None;
    }

    let major = u16::from_le_bytes(data[4..6].try_into().ok()?);
    if major != 2 {
        return None;
    }

    // Reference numbers carry a sequence counter in the top 16 bits; file
    // identity lives in the low 48.
    let frn = u64::from_le_bytes(data[8..16].try_into().ok()?) & 0x0000_FFFF_FFFF_FFFF;
    let parent_frn = u64::from_le_bytes(data[16..24].try_into().ok()?) & 0x0000_FFFF_FFFF_FFFF;
    let usn = i64::from_le_bytes(data[24..32].try_into().ok()?);
    let timestamp = filetime_to_utc(i64::from_le_bytes(data[32..40].try_into().ok()?));
    let reasons = ReasonFlags(u32::from_le_bytes(data[40..44].try_into().ok()?));
    let attributes = u32::from_le_bytes(data[52..56].try_into().ok()?);

    let name_len = u16::from_le_bytes(data[56..58].try_into().ok()?) as usize;
    let name_offset = u16::from_le_bytes(data[58..60].try_into().ok()?) as usize;
    if name_offset + name_len > data.len() || name_len == 0 {
        return None;
    }

    let utf16: Vec<u16> = data[name_offset..name_offset + name_len]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let name = String::from_utf16_lossy(&utf16);

    // NTFS metadata files ($Mft, $LogFile, ...) are noise for activity
    // indexing purposes.
    if name.starts_with('$') {
        return None;
    }

    Some(ParsedRecord {
        usn,
        frn,
        parent_frn,
        reasons,
        timestamp,
        is_directory: attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
        name,
    })
}

impl Inner {
    /// Resolve a reference number to its path with `OpenFileById`, going
    /// through the cache first. Returns None for unreachable parents
    /// (deleted directories, resolution races).
    fn parent_path(&self, parent_frn: u64) -> Option<PathBuf> {
        if let Ok(cache) = self.parent_paths.lock()
            && let Some(path) = cache.get(&parent_frn)
        {
            return Some(path.clone());
        }

        let file_id = FILE_ID_DESCRIPTOR {
            dwSize: mem::size_of::<FILE_ID_DESCRIPTOR>() as u32,
            Type: FILE_ID_TYPE(0),
            Anonymous: FILE_ID_DESCRIPTOR_0 {
                FileId: parent_frn as i64,
            },
        };

        let handle = unsafe {
            OpenFileById(
                self.handle.handle,
                &file_id,
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                FILE_FLAG_BACKUP_SEMANTICS,
            )
        }
        .ok()?;

        let mut buf = vec![0u16; 512];
        let len = unsafe { GetFinalPathNameByHandleW(handle, &mut buf, FILE_NAME_NORMALIZED) };
        unsafe {
            let _ = CloseHandle(handle);
        }

        if len == 0 || len as usize > buf.len() {
            return None;
        }

        let raw = String::from_utf16_lossy(&buf[..len as usize]);
        let cleaned = raw.strip_prefix("\\\\?\\").unwrap_or(&raw);
        let path = PathBuf::from(cleaned);

        if let Ok(mut cache) = self.parent_paths.lock() {
            cache.insert(parent_frn, path.clone());
        }
        Some(path)
    }

    fn invalidate_parent(&self, frn: u64) {
        if let Ok(mut cache) = self.parent_paths.lock() {
            cache.remove(&frn);
        }
    }

    fn read_batch_blocking(&self, start_usn: i64, max_records: usize) -> Result<JournalBatch> {
        let read_data = ReadUsnJournalDataV0 {
            start_usn,
            // Full reason mask: the collector classifies, the reader does
            // not filter.
            reason_mask: u32::MAX,
            return_only_on_close: 0,
            timeout: 0,
            bytes_to_wait_for: 0,
            usn_journal_id: self.journal_id,
        };

        let mut buffer = vec![0u8; READ_BUFFER_BYTES];
        let mut bytes_returned: u32 = 0;

        unsafe {
            DeviceIoControl(
                self.handle.handle,
                FSCTL_READ_USN_JOURNAL,
                Some(&read_data as *const _ as *const _),
                mem::size_of::<ReadUsnJournalDataV0>() as u32,
                Some(buffer.as_mut_ptr() as *mut _),
                buffer.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        }
        .map_err(|err| classify(&self.volume, "read journal", err))?;

        if bytes_returned < 8 {
            return Ok(JournalBatch {
                records: Vec::new(),
                next_usn: start_usn,
            });
        }

        // First 8 bytes are the next USN to read from.
        let next_usn = i64::from_le_bytes(buffer[0..8].try_into().expect("fixed slice"));
        let mut records = Vec::new();
        let mut offset = 8usize;

        while offset + 4 <= bytes_returned as usize && records.len() < max_records {
            let record_len =
                u32::from_le_bytes(buffer[offset..offset + 4].try_into().expect("fixed slice"))
                    as usize;
            if record_len < 64 || offset + record_len > bytes_returned as usize {
                if record_len != 0 && record_len < 64 {
                    // A length smaller than the fixed header cannot occur in
                    // a well-formed journal; bail out before the offset
                    // arithmetic spirals.
                    return Err(EngramError::Structural(format!(
                        "USN record length {record_len} below header size at offset {offset}"
                    )));
                }
                break;
            }

            if let Some(parsed) = parse_record_v2(&buffer[offset..offset + record_len]) {
                if parsed
                    .reasons
                    .intersects(ReasonFlags::RENAME_OLD_NAME | ReasonFlags::RENAME_NEW_NAME)
                {
                    self.invalidate_parent(parsed.frn);
                }

                let full_path = match self.parent_path(parsed.parent_frn) {
                    Some(parent) => parent.join(&parsed.name),
                    None => PathBuf::from(&self.drive_prefix).join(&parsed.name),
                };

                records.push(RawJournalRecord {
                    usn: parsed.usn,
                    file_reference_number: parsed.frn,
                    parent_reference_number: parsed.parent_frn,
                    reasons: parsed.reasons,
                    name: full_path.to_string_lossy().into_owned(),
                    timestamp: parsed.timestamp,
                    is_directory: parsed.is_directory,
                    file_size: None,
                });
            }

            offset += record_len;
        }

        Ok(JournalBatch {
            records,
            next_usn: next_usn.max(start_usn),
        })
    }
}

impl UsnJournalSource {
    /// Open the USN journal for a volume given as `C:` or `C`.
    pub fn open(volume: &str) -> Result<Self> {
        let handle = open_volume(volume)?;
        let metadata = query_journal(volume, &handle)?;
        let drive = volume.trim_end_matches(['\\', '/']).trim_end_matches(':');

        tracing::info!(
            target: "journal",
            volume,
            journal_id = metadata.journal_id,
            next_usn = metadata.next_usn,
            "opened USN journal"
        );

        Ok(UsnJournalSource {
            inner: Arc::new(Inner {
                volume: volume.to_string(),
                drive_prefix: format!("{drive}:\\"),
                handle,
                journal_id: metadata.journal_id,
                parent_paths: Mutex::new(HashMap::new()),
            }),
        })
    }
}

#[async_trait]
impl JournalSource for UsnJournalSource {
    fn volume(&self) -> &str {
        &self.inner.volume
    }

    async fn metadata(&self) -> Result<JournalMetadata> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || query_journal(&inner.volume, &inner.handle))
            .await
            .map_err(|err| EngramError::Internal(format!("journal query task failed: {err}")))?
    }

    async fn read_batch(&self, next_usn: i64, max_records: usize) -> Result<JournalBatch> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.read_batch_blocking(next_usn, max_records))
            .await
            .map_err(|err| EngramError::Internal(format!("journal read task failed: {err}")))?
    }
}
