use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one encoded event. A larger length prefix means a torn or
/// corrupt header, not a real record.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact event, or `None` at the end of the valid prefix.
fn read_event(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

/// Append-only log of room and reservation events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// Replay stops at the first torn or corrupt entry; everything after it is
/// treated as never written.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one event. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over
    /// the live file, reopen.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        // anything still buffered belongs to the old file
        self.writer.flush()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// All intact events in `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = read_event(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Money, RoomStatus};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room_created(id: Ulid) -> Event {
        Event::RoomCreated {
            id,
            name: Some("101".into()),
            rate: Money::from_major(5000),
            status: RoomStatus::Available,
        }
    }

    fn write_all(path: &Path, events: &[Event]) {
        let mut wal = Wal::open(path).unwrap();
        for e in events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let id = Ulid::new();
        let events = vec![
            room_created(id),
            Event::RoomStatusReconciled {
                id,
                status: RoomStatus::Occupied,
            },
            Event::RoomDeleted { id },
        ];
        write_all(&path, &events);
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = room_created(Ulid::new());
        write_all(&path, std::slice::from_ref(&event));
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn missing_file_is_empty_log() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_crc_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = room_created(Ulid::new());
        write_all(&path, std::slice::from_ref(&good));
        {
            let payload = bincode::serialize(&Event::RoomDeleted { id: Ulid::new() }).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        // the good entry after a corrupt one would be unreachable anyway
        write_all(&path, &[room_created(Ulid::new())]);
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn absurd_length_prefix_stops_replay() {
        let path = tmp_path("absurd_len.wal");
        let good = room_created(Ulid::new());
        write_all(&path, std::slice::from_ref(&good));
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let id = Ulid::new();
        let mut churn = vec![room_created(id)];
        for i in 0..20 {
            churn.push(Event::RoomStatusReconciled {
                id,
                status: if i % 2 == 0 { RoomStatus::Occupied } else { RoomStatus::Available },
            });
        }
        write_all(&path, &churn);
        let before = fs::metadata(&path).unwrap().len();

        let after_event = Event::RoomDeleted { id };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&[room_created(id)]).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append_buffered(&after_event).unwrap();
            assert_eq!(wal.appends_since_compact(), 1);
            wal.flush_sync().unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![room_created(id), after_event]);
        assert!(!path.with_extension("wal.tmp").exists());
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = std::env::temp_dir()
            .join("roomkeep_test_wal")
            .join(Ulid::new().to_string());
        let path = dir.join("nested.wal");
        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.path(), path.as_path());
        assert!(dir.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
