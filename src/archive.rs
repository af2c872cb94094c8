//! Tar archive planning and streaming.
//!
//! A download response must declare its exact Content-Length before the first
//! body byte, so the subtree is walked once up front into an [`ArchiveEntry`]
//! plan. The size estimate and the streamed bytes are both derived from that
//! single plan, which makes their traversal order identical by construction.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ServeError;
use crate::listing::natural_cmp;

/// Tar stores one 512-byte header per file and pads content to 512 bytes.
pub const BLOCK_SIZE: u64 = 512;
/// Two zero blocks mark the end of the archive.
pub const TRAILER_SIZE: u64 = 1024;

const READ_CHUNK: usize = 64 * 1024;

static ZERO_BLOCKS: [u8; TRAILER_SIZE as usize] = [0; TRAILER_SIZE as usize];

/// One file scheduled for archiving. Directories are not stored as entries;
/// they exist only in the slash-joined entry names.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// Archive-relative name, e.g. `albums/track01.mp3`.
    pub name: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Size recorded at walk time; the stream is held to exactly this.
    pub size: u64,
    header: tar::Header,
}

/// Walk a subtree into the ordered entry plan.
///
/// Order is depth-first with the files of a directory written before any of
/// its subdirectories are descended into, both groups sorted naturally by
/// name. Dotfiles and dot-directories are skipped entirely. A failed stat
/// aborts the whole plan; silently dropping the entry would break the
/// promised Content-Length.
pub fn build_plan(root: &Path) -> Result<Vec<ArchiveEntry>, ServeError> {
    let mut plan = Vec::new();
    walk(root, String::new(), &mut plan)?;
    Ok(plan)
}

fn walk(dir: &Path, prefix: String, plan: &mut Vec<ArchiveEntry>) -> Result<(), ServeError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut subdirs: Vec<(String, PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(dir).map_err(|err| walk_error(dir, err))? {
        let entry = entry.map_err(|err| walk_error(dir, err))?;
        // The lossy string is only ever the display/archive name; filesystem
        // access goes through the entry's own path so non-UTF-8 names still
        // stat correctly.
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(|err| walk_error(dir, err))?;
        if file_type.is_dir() {
            subdirs.push((name, entry.path()));
        } else {
            files.push((name, entry.path()));
        }
    }

    files.sort_by(|a, b| natural_cmp(&a.0, &b.0));
    subdirs.sort_by(|a, b| natural_cmp(&a.0, &b.0));

    for (name, path) in files {
        let meta = std::fs::metadata(&path).map_err(|err| walk_error(&path, err))?;
        let name = format!("{prefix}{name}");
        let header = file_header(&name, &meta).map_err(|err| walk_error(&path, err))?;
        plan.push(ArchiveEntry {
            name,
            path,
            size: meta.len(),
            header,
        });
    }

    for (name, path) in subdirs {
        walk(&path, format!("{prefix}{name}/"), plan)?;
    }

    Ok(())
}

fn walk_error(path: &Path, source: io::Error) -> ServeError {
    ServeError::Walk {
        path: path.display().to_string(),
        source,
    }
}

fn file_header(name: &str, meta: &std::fs::Metadata) -> io::Result<tar::Header> {
    let mut header = tar::Header::new_ustar();
    header.set_path(name)?;
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(meta.len());
    header.set_mode(0o644);
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    header.set_mtime(mtime);
    header.set_cksum();
    Ok(header)
}

/// Zero padding needed after `size` content bytes to reach a block boundary.
pub fn block_padding(size: u64) -> u64 {
    (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE
}

/// Exact byte length of the archive [`write_archive`] will produce for `plan`.
pub fn archive_size(plan: &[ArchiveEntry]) -> u64 {
    plan.iter()
        .map(|entry| BLOCK_SIZE + entry.size + block_padding(entry.size))
        .sum::<u64>()
        + TRAILER_SIZE
}

/// Stream the archive for `plan` into `tx`, strictly one entry at a time.
///
/// Each entry is header, then content, then padding, fully written before the
/// next entry starts; interleaving would corrupt entry boundaries. At most
/// one file handle is open at any point, scoped to the entry being written.
///
/// Returns `Ok(())` when the archive is complete or the receiver is dropped
/// (client disconnected mid-download); returns an error if a file cannot be
/// read or no longer holds its planned size.
pub async fn write_archive(
    plan: Vec<ArchiveEntry>,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> io::Result<()> {
    for entry in &plan {
        if !send(tx, Bytes::copy_from_slice(entry.header.as_bytes())).await {
            return Ok(());
        }

        let file = tokio::fs::File::open(&entry.path).await?;
        // Cap at the planned size so a file that grew since the walk cannot
        // overrun its entry.
        let mut reader = file.take(entry.size);
        let mut written = 0u64;
        loop {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            buf.truncate(n);
            if !send(tx, Bytes::from(buf)).await {
                return Ok(());
            }
        }
        if written != entry.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} shrank mid-stream: expected {} bytes, read {written}",
                    entry.name, entry.size
                ),
            ));
        }

        let padding = block_padding(entry.size) as usize;
        if padding > 0 && !send(tx, Bytes::from_static(&ZERO_BLOCKS[..padding])).await {
            return Ok(());
        }
    }

    if send(tx, Bytes::from_static(&ZERO_BLOCKS)).await {
        debug!(entries = plan.len(), "archive stream complete");
    }
    Ok(())
}

/// Returns false when the receiver has gone away.
async fn send(tx: &mpsc::Sender<io::Result<Bytes>>, chunk: Bytes) -> bool {
    tx.send(Ok(chunk)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    async fn collect_archive(plan: Vec<ArchiveEntry>) -> io::Result<Vec<u8>> {
        let (tx, mut rx) = mpsc::channel(8);
        let writer = tokio::spawn(async move { write_archive(plan, &tx).await });
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        writer.await.unwrap()?;
        Ok(out)
    }

    #[test]
    fn block_padding_rounds_up_to_512() {
        assert_eq!(block_padding(0), 0);
        assert_eq!(block_padding(1), 511);
        assert_eq!(block_padding(511), 1);
        assert_eq!(block_padding(512), 0);
        assert_eq!(block_padding(513), 511);
        assert_eq!(block_padding(1024), 0);
    }

    #[test]
    fn plan_orders_files_before_subdirs_and_skips_hidden() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        std::fs::write(root.join("b.txt"), "b").unwrap();
        std::fs::write(root.join("a10.txt"), "ten").unwrap();
        std::fs::write(root.join("a2.txt"), "two").unwrap();
        std::fs::write(root.join(".hidden"), "x").unwrap();
        std::fs::create_dir(root.join(".git")).unwrap();
        std::fs::write(root.join(".git").join("config"), "x").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub").join("inner.txt"), "inner").unwrap();

        let plan = build_plan(root).unwrap();
        let names: Vec<&str> = plan.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a2.txt", "a10.txt", "b.txt", "sub/inner.txt"]);
    }

    #[test]
    fn empty_tree_is_trailer_only() {
        let temp = TempDir::new().unwrap();
        let plan = build_plan(temp.path()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(archive_size(&plan), TRAILER_SIZE);
    }

    #[test]
    fn block_aligned_file_needs_no_padding() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("exact.bin"), vec![7u8; 512]).unwrap();

        let plan = build_plan(temp.path()).unwrap();
        assert_eq!(archive_size(&plan), 512 + 512 + 1024);
    }

    #[test]
    fn size_matches_per_file_formula() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("a.bin"), vec![1u8; 100]).unwrap();
        std::fs::write(root.join("b.bin"), vec![2u8; 513]).unwrap();
        std::fs::create_dir(root.join("d")).unwrap();
        std::fs::write(root.join("d").join("c.bin"), vec![3u8; 1024]).unwrap();

        let plan = build_plan(root).unwrap();
        let expected: u64 = plan
            .iter()
            .map(|e| 512 + e.size + block_padding(e.size))
            .sum::<u64>()
            + 1024;
        assert_eq!(archive_size(&plan), expected);
        assert_eq!(
            archive_size(&plan),
            (512 + 100 + 412) + (512 + 513 + 511) + (512 + 1024) + 1024
        );
    }

    #[tokio::test]
    async fn stream_length_equals_estimate() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("one.txt"), "hello").unwrap();
        std::fs::write(root.join("two.bin"), vec![0xabu8; 700]).unwrap();
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("nested").join("three.txt"), "deep").unwrap();

        let plan = build_plan(root).unwrap();
        let expected = archive_size(&plan);
        let bytes = collect_archive(plan).await.unwrap();
        assert_eq!(bytes.len() as u64, expected);
    }

    #[tokio::test]
    async fn empty_tree_streams_zero_entries() {
        let temp = TempDir::new().unwrap();
        let plan = build_plan(temp.path()).unwrap();
        let bytes = collect_archive(plan).await.unwrap();
        assert_eq!(bytes.len() as u64, TRAILER_SIZE);

        let mut archive = tar::Archive::new(bytes.as_slice());
        assert_eq!(archive.entries().unwrap().count(), 0);
    }

    #[tokio::test]
    async fn parsed_archive_matches_plan_order_and_content() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("z.txt"), "zed").unwrap();
        std::fs::create_dir(root.join("albums")).unwrap();
        std::fs::write(root.join("albums").join("track2.mp3"), "22").unwrap();
        std::fs::write(root.join("albums").join("track10.mp3"), "1010").unwrap();
        std::fs::write(root.join(".skip"), "no").unwrap();

        let plan = build_plan(root).unwrap();
        let planned: Vec<(String, u64)> = plan.iter().map(|e| (e.name.clone(), e.size)).collect();
        assert_eq!(
            planned,
            [
                ("z.txt".to_string(), 3),
                ("albums/track2.mp3".to_string(), 2),
                ("albums/track10.mp3".to_string(), 4),
            ]
        );

        let bytes = collect_archive(plan).await.unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut unpacked = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            unpacked.push((name, entry.size(), content));
        }
        assert_eq!(
            unpacked,
            [
                ("z.txt".to_string(), 3, "zed".to_string()),
                ("albums/track2.mp3".to_string(), 2, "22".to_string()),
                ("albums/track10.mp3".to_string(), 4, "1010".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn shrunk_file_aborts_the_stream() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("volatile.bin"), vec![9u8; 1000]).unwrap();

        let plan = build_plan(root).unwrap();
        std::fs::write(root.join("volatile.bin"), vec![9u8; 10]).unwrap();

        let err = collect_archive(plan).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_file_name_still_archives() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let name = OsStr::from_bytes(b"bad\xffname.bin");
        std::fs::write(temp.path().join(name), vec![5u8; 10]).unwrap();

        let plan = build_plan(temp.path()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].size, 10);
        // On-disk path keeps the raw bytes; only the entry name is lossy.
        assert_eq!(plan[0].path, temp.path().join(name));
        assert!(plan[0].name.contains('\u{fffd}'));

        let expected = archive_size(&plan);
        let bytes = collect_archive(plan).await.unwrap();
        assert_eq!(bytes.len() as u64, expected);
    }

    #[test]
    fn stat_failure_surfaces_as_walk_error() {
        let err = build_plan(Path::new("/definitely/not/a/real/dir")).unwrap_err();
        assert!(matches!(err, ServeError::Walk { .. }));
    }
}
