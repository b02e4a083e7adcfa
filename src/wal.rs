use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ulid::Ulid;

use crate::model::Record;

const MAGIC: [u8; 4] = *b"RSTL";
pub const FORMAT_VERSION: u16 = 1;
/// magic + version + club id
pub const HEADER_LEN: u64 = 4 + 2 + 16;

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn write_header(w: &mut impl Write, club_id: Ulid) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())?;
    w.write_all(&u128::from(club_id).to_le_bytes())
}

/// Validate the header of an existing log. `Ok(false)` if there is no
/// complete header yet: a missing file, or a crash before the header landed.
fn check_header(path: &Path, club_id: Ulid) -> io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() < HEADER_LEN {
        return Ok(false);
    }

    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(invalid(format!("{} is not a roster log", path.display())));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(invalid(format!(
            "{}: unsupported log format version {version}",
            path.display()
        )));
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&header[6..]);
    let owner = Ulid::from(u128::from_le_bytes(id));
    if owner != club_id {
        return Err(invalid(format!(
            "{} belongs to club {owner}, not {club_id}",
            path.display()
        )));
    }
    Ok(true)
}

/// Encode a single record as `[u32 len][bincode][u32 crc32]`.
fn encode_record(buf: &mut Vec<u8>, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// One club's append-only roster log.
///
/// The file opens with a header (`RSTL`, format version, owning club id)
/// followed by `[u32 len][bincode Record][u32 crc32]` entries. A log written
/// for one club never replays into another. Batches are committed whole: a
/// failed write is cut back off the file so later commits never sit behind
/// garbage that replay would stop at.
pub struct Wal {
    file: File,
    path: PathBuf,
    club_id: Ulid,
    /// File length after the last successful commit.
    committed_len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log for `club_id` at `path`.
    pub fn open(path: &Path, club_id: Ulid) -> io::Result<Self> {
        let has_header = check_header(path, club_id)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if !has_header {
            file.set_len(0)?;
            write_header(&mut file, club_id)?;
            file.sync_all()?;
        }
        let committed_len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            club_id,
            committed_len,
            appends_since_compact: 0,
        })
    }

    /// Durably append a batch: one write, one fsync. On failure nothing from
    /// the batch stays in the file.
    pub fn commit<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) -> io::Result<()> {
        let mut buf = Vec::new();
        let mut count = 0u64;
        for record in records {
            encode_record(&mut buf, record)?;
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        if let Err(e) = self.file.write_all(&buf).and_then(|()| self.file.sync_data()) {
            if let Err(cut) = self.truncate_to_committed() {
                tracing::error!(
                    "{}: could not cut back a failed batch: {cut}",
                    self.path.display()
                );
            }
            return Err(e);
        }
        self.committed_len += buf.len() as u64;
        self.appends_since_compact += count;
        Ok(())
    }

    /// Drop any bytes past the last successful commit.
    pub fn truncate_to_committed(&mut self) -> io::Result<()> {
        self.file.set_len(self.committed_len)?;
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the log with `records`: written to a temp file with a fresh
    /// header, fsynced, then renamed over the live log.
    pub fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut buf = Vec::new();
        write_header(&mut buf, self.club_id)?;
        for record in records {
            encode_record(&mut buf, record)?;
        }
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.committed_len = buf.len() as u64;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read back every intact record of `club_id`'s log. A torn or corrupt
    /// tail ends the replay; a foreign or unknown header is an error.
    pub fn replay(path: &Path, club_id: Ulid) -> io::Result<Vec<Record>> {
        if !check_header(path, club_id)? {
            return Ok(Vec::new());
        }
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            let mut crc_buf = [0u8; 4];
            let read = reader
                .read_exact(&mut payload)
                .and_then(|()| reader.read_exact(&mut crc_buf));
            match read {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!("{}: torn tail after {} records", path.display(), records.len());
                    break;
                }
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(
                    "{}: CRC mismatch after {} records, ignoring the rest",
                    path.display(),
                    records.len()
                );
                break;
            }
            match bincode::deserialize::<Record>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("{}: undecodable record: {e}", path.display());
                    break;
                }
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Assignment;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rosterline_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn member_added(name: &str) -> Record {
        Record::MemberAdded {
            id: Ulid::new(),
            name: name.into(),
        }
    }

    #[test]
    fn commit_and_replay() {
        let path = tmp_path("commit_and_replay.wal");
        let club = Ulid::new();
        let records = vec![
            member_added("Ada"),
            Record::SubteamCreated {
                id: Ulid::new(),
                name: "Varsity".into(),
                max_headcount: 15,
            },
            Record::AssignmentCreated(Assignment::new(Ulid::new(), Ulid::new(), Ulid::new())),
        ];

        {
            let mut wal = Wal::open(&path, club).unwrap();
            wal.commit(&records[..1]).unwrap();
            wal.commit(&records[1..]).unwrap();
            assert_eq!(wal.appends_since_compact(), 3);
        }

        assert_eq!(Wal::replay(&path, club).unwrap(), records);
    }

    #[test]
    fn new_log_is_just_a_header() {
        let path = tmp_path("header_only.wal");
        let club = Ulid::new();
        Wal::open(&path, club).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN);
        assert!(Wal::replay(&path, club).unwrap().is_empty());
    }

    #[test]
    fn foreign_club_log_rejected() {
        let path = tmp_path("foreign.wal");
        let owner = Ulid::new();
        {
            let mut wal = Wal::open(&path, owner).unwrap();
            wal.commit([&member_added("Ada")]).unwrap();
        }

        let intruder = Ulid::new();
        let err = Wal::replay(&path, intruder).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains(&owner.to_string()));
        assert!(Wal::open(&path, intruder).is_err());
        // Rejection left the owner's records alone.
        assert_eq!(Wal::replay(&path, owner).unwrap().len(), 1);
    }

    #[test]
    fn unknown_magic_and_version_rejected() {
        let club = Ulid::new();

        let path = tmp_path("bad_magic.wal");
        fs::write(&path, [0u8; HEADER_LEN as usize + 8]).unwrap();
        assert!(Wal::replay(&path, club).is_err());

        let path = tmp_path("bad_version.wal");
        let mut header = Vec::new();
        write_header(&mut header, club).unwrap();
        header[4] = 9;
        fs::write(&path, &header).unwrap();
        let err = Wal::replay(&path, club).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn partial_header_is_rewritten() {
        let path = tmp_path("partial_header.wal");
        let club = Ulid::new();
        fs::write(&path, b"RST").unwrap();

        assert!(Wal::replay(&path, club).unwrap().is_empty());
        let mut wal = Wal::open(&path, club).unwrap();
        wal.commit([&member_added("Ada")]).unwrap();
        assert_eq!(Wal::replay(&path, club).unwrap().len(), 1);
    }

    #[test]
    fn replay_stops_at_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let club = Ulid::new();
        let record = member_added("Grace");
        {
            let mut wal = Wal::open(&path, club).unwrap();
            wal.commit([&record]).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        assert_eq!(Wal::replay(&path, club).unwrap(), vec![record]);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let club = Ulid::new();
        let good = member_added("Ada");
        {
            let mut wal = Wal::open(&path, club).unwrap();
            wal.commit([&good]).unwrap();
        }
        {
            let payload = bincode::serialize(&Record::SubteamDeleted { id: Ulid::new() }).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path, club).unwrap(), vec![good]);
    }

    #[test]
    fn uncommitted_bytes_are_cut_before_next_commit() {
        let path = tmp_path("cut_uncommitted.wal");
        let club = Ulid::new();
        let first = member_added("Ada");
        let second = member_added("Grace");

        let mut wal = Wal::open(&path, club).unwrap();
        wal.commit([&first]).unwrap();
        // A half-written batch, as a failed write leaves it.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xFF; 11]).unwrap();
        }
        wal.truncate_to_committed().unwrap();
        wal.commit([&second]).unwrap();

        assert_eq!(Wal::replay(&path, club).unwrap(), vec![first, second]);
    }

    #[test]
    fn compact_keeps_header_then_appends() {
        let path = tmp_path("compact.wal");
        let club = Ulid::new();
        let (member, subteam, event) = (Ulid::new(), Ulid::new(), Ulid::new());
        let kept = Record::MemberAdded {
            id: member,
            name: "Ada".into(),
        };
        let later = Record::AssignmentCreated(Assignment::new(member, subteam, event));

        let mut wal = Wal::open(&path, club).unwrap();
        wal.commit([&kept]).unwrap();
        for _ in 0..10 {
            wal.commit([
                &Record::AssignmentCreated(Assignment::new(member, subteam, event)),
                &Record::AssignmentRemoved {
                    member_id: member,
                    event_id: event,
                },
            ])
            .unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(std::slice::from_ref(&kept)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        wal.commit([&later]).unwrap();

        assert!(fs::metadata(&path).unwrap().len() < before);
        assert_eq!(Wal::replay(&path, club).unwrap(), vec![kept, later]);
        assert!(Wal::replay(&path, Ulid::new()).is_err());
    }
}
