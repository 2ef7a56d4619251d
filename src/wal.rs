use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Length prefix plus CRC trailer around each payload.
const RECORD_OVERHEAD: usize = 8;

/// No event comes near this; a larger length prefix is corruption.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode one event as `[len][bincode][crc32]`, returning the bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok((RECORD_OVERHEAD + payload.len()) as u64)
}

/// Append-only log of reservation ledger and availability events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A record torn by a crash fails the length or CRC check; [`Wal::recover`]
///   cuts it off before new records are appended behind it.
///
/// Records reach the file only through [`Wal::commit`], which writes a batch
/// and fsyncs it or rolls the file back to the last committed length. A batch
/// whose callers were told it failed can never show up on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful commit.
    committed_len: u64,
    appends_since_compact: u64,
    /// Set when a rollback itself failed; the file tail is unknown.
    poisoned: bool,
}

/// Intact records in the log plus the byte length they span.
struct LogContents {
    events: Vec<Event>,
    valid_len: u64,
}

impl Wal {
    /// Replay the log at `path` and open it for appending. A torn or corrupt
    /// tail is truncated so new records land right after the last intact one.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let LogContents { events, valid_len } = read_log(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            tracing::warn!(path = %path.display(), valid_len, "truncating torn WAL tail");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len: valid_len,
            appends_since_compact: 0,
            poisoned: false,
        };
        Ok((wal, events))
    }

    /// Every intact record on disk. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_log(path).map(|c| c.events)
    }

    /// Write `events` and fsync them as one unit.
    ///
    /// On any error the file is truncated back to its length before the call,
    /// so either every event in the batch is durable or none is on disk.
    pub fn commit<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL is poisoned by a failed rollback"));
        }
        match self.write_batch(events) {
            Ok((written, appended)) => {
                self.committed_len += written;
                self.appends_since_compact += appended;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!(error = %rollback, "WAL rollback failed, refusing further writes");
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    /// Bytes and records written, once flushed and synced.
    fn write_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<(u64, u64)> {
        let mut written = 0;
        let mut appended = 0;
        for event in events {
            written += encode_event(&mut self.writer, event)?;
            appended += 1;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok((written, appended))
    }

    /// Drop anything buffered or written since the last commit.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        // `into_parts` hands back the unflushed buffer instead of writing it out.
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        drop(stale.into_parts());
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted event set to `<wal>.wal.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<u64> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        let mut len = 0;
        for event in events {
            len += encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(len)
    }

    /// Rename the temp file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self, compacted_len: u64) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.committed_len = compacted_len;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let len = Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file(len)
    }

    /// Records committed since open or the last compaction.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

/// Read records until EOF or the first torn or corrupt one.
fn read_log(path: &Path) -> io::Result<LogContents> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(LogContents {
                events: Vec::new(),
                valid_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_record_part(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_LEN {
            break;
        }
        let mut payload = vec![0u8; len];
        let mut crc_buf = [0u8; 4];
        if !read_record_part(&mut reader, &mut payload)? || !read_record_part(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }
        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
        valid_len += (RECORD_OVERHEAD + len) as u64;
    }

    Ok(LogContents { events, valid_len })
}

/// `false` on a short read at the end of the file.
fn read_record_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
