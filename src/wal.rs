//! The reservation log file.
//!
//! A log starts with a five byte header, `PBWL` followed by the format
//! version, then holds one frame per event:
//! `[u32 len][u32 crc32 over len and payload][bincode Event]`, little-endian.
//! Opening a log keeps every intact frame and cuts off whatever follows the
//! first damaged one, so later appends are never stranded behind garbage.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::limits::MAX_WAL_ENTRY_BYTES;
use crate::model::Event;

const HEADER: [u8; 5] = *b"PBWL\x01";
const FRAME_HEAD: usize = 8;

fn invalid(msg: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn frame_crc(len: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(len);
    hasher.update(payload);
    hasher.finalize()
}

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(invalid)?;
    if payload.len() > MAX_WAL_ENTRY_BYTES {
        return Err(invalid("event too large for the reservation log"));
    }
    let len = (payload.len() as u32).to_le_bytes();
    writer.write_all(&len)?;
    writer.write_all(&frame_crc(&len, &payload).to_le_bytes())?;
    writer.write_all(&payload)
}

/// The frame starting at `at`, with the offset just past it.
/// `None` if the frame is incomplete, oversized or fails its checksum.
fn read_frame(bytes: &[u8], at: usize) -> Option<(Event, usize)> {
    let head = bytes.get(at..at.checked_add(FRAME_HEAD)?)?;
    let (len_bytes, crc_bytes) = head.split_at(4);
    let len = u32::from_le_bytes(len_bytes.try_into().ok()?) as usize;
    if len > MAX_WAL_ENTRY_BYTES {
        return None;
    }
    let end = at + FRAME_HEAD + len;
    let payload = bytes.get(at + FRAME_HEAD..end)?;
    if u32::from_le_bytes(crc_bytes.try_into().ok()?) != frame_crc(len_bytes, payload) {
        return None;
    }
    let event = bincode::deserialize(payload).ok()?;
    Some((event, end))
}

/// What survived on disk.
#[derive(Debug, Default)]
pub struct Recovered {
    pub events: Vec<Event>,
    /// Bytes after the last intact frame.
    pub discarded: u64,
    /// Length of the header plus every intact frame.
    valid_len: u64,
}

/// Read every intact event of the log at `path` without touching the file.
///
/// A missing or empty file, or one cut off inside its header, is an empty log.
/// A file with some other header is not a reservation log and is an error.
pub fn recover(path: &Path) -> io::Result<Recovered> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Recovered::default()),
        Err(e) => return Err(e),
    };
    if bytes.len() < HEADER.len() {
        if HEADER.starts_with(&bytes) {
            return Ok(Recovered {
                discarded: bytes.len() as u64,
                ..Recovered::default()
            });
        }
        return Err(invalid(format!("{} is not a reservation log", path.display())));
    }
    if bytes[..HEADER.len()] != HEADER {
        return Err(invalid(format!(
            "{} is not a reservation log of format {}",
            path.display(),
            HEADER[4]
        )));
    }

    let mut events = Vec::new();
    let mut at = HEADER.len();
    while let Some((event, next)) = read_frame(&bytes, at) {
        events.push(event);
        at = next;
    }
    Ok(Recovered {
        events,
        discarded: (bytes.len() - at) as u64,
        valid_len: at as u64,
    })
}

fn create_with_header(path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&HEADER)?;
    file.sync_all()
}

fn append_writer(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append handle on a reservation log. Owned by a single writer task.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Recover the log at `path`, creating it if needed, and open it for appends.
    /// A damaged tail is truncated before the first append.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let recovered = recover(path)?;
        if recovered.valid_len == 0 {
            create_with_header(path)?;
        } else if recovered.discarded > 0 {
            warn!(
                "reservation log {}: dropping {} damaged bytes after {} events",
                path.display(),
                recovered.discarded,
                recovered.events.len()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(recovered.valid_len)?;
            file.sync_all()?;
        }

        let wal = Self {
            writer: append_writer(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, recovered.events))
    }

    /// Append one event and fsync. Tests only; the store batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` as a complete log next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::snapshot_path(path))?);
        writer.write_all(&HEADER)?;
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Move the snapshot over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        // Anything still buffered belongs to the old file.
        self.writer.flush()?;
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        self.writer = append_writer(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("pitchbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(start: Minutes) -> Event {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        Event::ReservationCreated {
            reservation: Reservation {
                id: Ulid::new(),
                resource_id: Ulid::new(),
                date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
                interval: TimeInterval::new(start, start + 60),
                status: Status::Confirmed,
                holder: Holder::Account(Ulid::new()),
                total_price: 3500,
                currency: DEFAULT_CURRENCY.into(),
                payment_method: PaymentMethod::Cash,
                payment_state: PaymentState::Unpaid,
                payment_ref: None,
                rescheduled_from: None,
                cancellation: None,
                created_at: at,
                updated_at: at,
            },
        }
    }

    fn cancelled(event: &Event) -> Event {
        let Event::ReservationCreated { reservation } = event else {
            panic!("expected a creation event");
        };
        let at = reservation.created_at;
        Event::StatusChanged {
            id: reservation.id,
            key: reservation.key(),
            update: StatusUpdate {
                status: Status::Cancelled,
                payment_state: reservation.payment_state,
                payment_ref: None,
                cancellation: Some(Cancellation { at, by: Actor::Holder, refund_due: 0 }),
                at,
            },
        }
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn new_log_starts_with_header() {
        let path = tmp_path("fresh.wal");
        let (_, events) = Wal::open(&path).unwrap();
        assert!(events.is_empty());
        assert_eq!(fs::read(&path).unwrap(), HEADER.to_vec());
    }

    #[test]
    fn append_and_reopen() {
        let path = tmp_path("append_and_reopen.wal");
        let first = created(600);
        let events = vec![first.clone(), cancelled(&first)];
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let (_, replayed) = Wal::open(&path).unwrap();
        assert_eq!(replayed, events);
    }

    #[test]
    fn torn_tail_is_cut_so_later_appends_survive() {
        let path = tmp_path("torn_tail.wal");
        let before = created(600);
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&before).unwrap();
        }
        // Half a frame, as left by a crash mid-write
        append_raw(&path, &[9, 0, 0, 0, 1, 2]);
        assert_eq!(recover(&path).unwrap().discarded, 6);

        let after = created(720);
        {
            let (mut wal, replayed) = Wal::open(&path).unwrap();
            assert_eq!(replayed, vec![before.clone()]);
            wal.append(&after).unwrap();
        }
        let recovered = recover(&path).unwrap();
        assert_eq!(recovered.events, vec![before, after]);
        assert_eq!(recovered.discarded, 0);
    }

    #[test]
    fn checksum_covers_the_length_prefix() {
        let path = tmp_path("bad_len.wal");
        let good = created(600);
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
            wal.append(&created(720)).unwrap();
        }
        // Nudge the second frame's length by one; payload bytes are untouched
        let mut bytes = fs::read(&path).unwrap();
        let second = HEADER.len() + FRAME_HEAD + bincode::serialize(&good).unwrap().len();
        bytes[second] ^= 1;
        fs::write(&path, &bytes).unwrap();

        assert_eq!(recover(&path).unwrap().events, vec![good]);
    }

    #[test]
    fn absurd_length_prefix_ends_recovery() {
        let path = tmp_path("absurd_len.wal");
        Wal::open(&path).unwrap();
        append_raw(&path, &u32::MAX.to_le_bytes());
        append_raw(&path, &[1, 2, 3, 4, 5]);
        let recovered = recover(&path).unwrap();
        assert!(recovered.events.is_empty());
        assert_eq!(recovered.discarded, 9);
    }

    #[test]
    fn foreign_file_is_refused() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"id,start,end\n").unwrap();
        let err = Wal::open(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // Left as found
        assert_eq!(fs::read(&path).unwrap(), b"id,start,end\n".to_vec());
    }

    #[test]
    fn partial_header_counts_as_empty() {
        let path = tmp_path("partial_header.wal");
        fs::write(&path, &HEADER[..3]).unwrap();
        let (_, events) = Wal::open(&path).unwrap();
        assert!(events.is_empty());
        assert_eq!(fs::read(&path).unwrap(), HEADER.to_vec());
    }

    #[test]
    fn compact_replaces_history_and_keeps_appending() {
        let path = tmp_path("compact_snapshot.wal");
        let keep = created(600);
        let next = created(1200);
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&keep).unwrap();
            for i in 0..10 {
                let churn = created(660 + i * 60);
                wal.append(&churn).unwrap();
                wal.append(&cancelled(&churn)).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();

            wal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted log should be smaller: {after} < {before}");

            wal.append(&next).unwrap();
        }
        assert_eq!(recover(&path).unwrap().events, vec![keep, next]);
    }

    #[test]
    fn buffered_appends_are_durable_after_flush() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|i| created(360 + i * 60)).collect();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(recover(&path).unwrap().events, events);
    }
}
