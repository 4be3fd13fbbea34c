use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::store::StoreEvent;

/// Encode one record as `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, event: &StoreEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only journal of committed store mutations.
///
/// Format per entry: `[u32: len][bincode: StoreEvent][u32: crc32]`.
/// A torn last entry (crash mid-write) fails the length or CRC check on
/// replay and is dropped together with anything after it.
pub struct Wal {
    file: File,
    path: PathBuf,
    appends_since_compact: u64,
    /// Set when a failed append could not be cut off again.
    poisoned: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::open_after_replay(path, 0)
    }

    /// Open for appending after `replayed` records were read back, so that
    /// they still count toward the compaction threshold.
    pub fn open_after_replay(path: &Path, replayed: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            appends_since_compact: replayed,
            poisoned: false,
        })
    }

    /// Append one record and fsync before returning. On error the file is
    /// cut back to its length before the call, so a record the caller saw
    /// fail never comes back on replay.
    pub fn append(&mut self, event: &StoreEvent) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "journal {} refuses appends after a failed rollback",
                self.path.display()
            )));
        }
        let started = Instant::now();
        let mut record = Vec::new();
        encode_record(&mut record, event)?;
        let start = self.file.metadata()?.len();
        if let Err(e) = self.write_synced(&record) {
            self.roll_back(start);
            return Err(e);
        }
        self.appends_since_compact += 1;
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    fn write_synced(&mut self, record: &[u8]) -> io::Result<()> {
        self.file.write_all(record)?;
        self.file.sync_all()
    }

    fn roll_back(&mut self, len: u64) {
        if let Err(e) = self.file.set_len(len).and_then(|()| self.file.sync_all()) {
            tracing::error!(
                path = %self.path.display(),
                "cannot cut failed append off the journal, refusing further appends: {e}"
            );
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with `events`: write a temp file, fsync, rename
    /// over the live file, reopen for appending.
    pub fn compact(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_record(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Read back every intact record. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Vec<StoreEvent>> {
        Ok(read_intact(path)?.0)
    }

    /// Like `replay`, but also cuts a torn or corrupt tail off the file so
    /// that new appends land right after the last intact record.
    pub fn recover(path: &Path) -> io::Result<Vec<StoreEvent>> {
        let (events, intact_len) = read_intact(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > intact_len
        {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = meta.len() - intact_len,
                "truncating journal after last intact record"
            );
            OpenOptions::new().write(true).open(path)?.set_len(intact_len)?;
        }
        Ok(events)
    }
}

/// Intact records and the byte length they occupy.
fn read_intact(path: &Path) -> io::Result<(Vec<StoreEvent>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        if !read_or_eof(&mut reader, &mut payload)? {
            break;
        }

        let mut crc_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            tracing::warn!(path = %path.display(), "journal entry failed CRC check, stopping replay");
            break;
        }

        match bincode::deserialize::<StoreEvent>(&payload) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!(path = %path.display(), "undecodable journal entry, stopping replay: {e}");
                break;
            }
        }
        intact_len += 8 + len as u64;
    }

    Ok((events, intact_len))
}

/// `Ok(false)` on a short read at the end of the file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
