use crate::services::TaskContext;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use vmctl_common::prelude::{Error, Result};

const ARCHIVE_NAME: &str = "source.ova";
const CONTENT_DIR: &str = "content";

/// An OVA downloaded and unpacked into its own working directory.
///
/// The directory is removed when this value is dropped.
///
#[derive(Debug)]
pub struct StagedOva {
    dir: TempDir,
    pub descriptor: PathBuf,
    /// Lowercase hex sha-256 of the downloaded archive.
    pub digest: String,
}

impl StagedOva {
    /// Directory holding the extracted files. Paths listed by the descriptor
    /// are relative to it.
    ///
    pub fn content_dir(&self) -> PathBuf {
        self.dir.path().join(CONTENT_DIR)
    }

    /// Directory of the `.ovf`. File references in the descriptor are
    /// relative to it.
    ///
    pub fn descriptor_dir(&self) -> PathBuf {
        self.descriptor
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.content_dir())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Downloads the OVA at `url` into a fresh directory under `root` and unpacks
/// it.
///
/// # Arguments
///
/// * `client`: HTTP client used for the download.
/// * `url`: Location of the archive.
/// * `root`: Directory under which the working directory is created.
/// * `context`: Deadline and cancellation scope of the calling task.
///
#[tracing::instrument(level = "trace", target = "service", skip(client, root, context))]
pub async fn stage(
    client: &reqwest::Client,
    url: &str,
    root: &Path,
    context: &TaskContext,
) -> Result<StagedOva> {
    let dir = tempfile::Builder::new().prefix("vmctl-ova-").tempdir_in(root)?;
    let archive = dir.path().join(ARCHIVE_NAME);
    let content = dir.path().join(CONTENT_DIR);

    let size = context.run(download(client, url, &archive)).await?;
    tracing::info!(target: "service", url, size, "OVA downloaded");

    context.check()?;
    let (digest, descriptor) =
        tokio::task::spawn_blocking(move || extract(&archive, &content)).await??;
    tracing::info!(target: "service", %digest, descriptor = %descriptor.display(), "OVA extracted");

    Ok(StagedOva {
        dir,
        descriptor,
        digest,
    })
}

async fn download(client: &reqwest::Client, url: &str, target: &Path) -> Result<u64> {
    let unavailable = |reason: String| Error::SourceUnavailable(format!("{}: {}", url, reason));

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| unavailable(error.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(format!("status {}", status)));
    }

    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    let mut size = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| unavailable(error.to_string()))?;
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(size)
}

// -----------------------------------------------------------------------------

/// Reader that feeds every byte it passes on into a sha-256 hasher.
///
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

fn malformed(error: impl ToString) -> Error {
    Error::ArchiveMalformed(error.to_string())
}

/// Unpacks the archive into `dest` while hashing it.
///
/// # Returns
///
/// The archive digest and the path of the first `.ovf` found.
///
fn extract(archive: &Path, dest: &Path) -> Result<(String, PathBuf)> {
    let mut reader = HashingReader::new(BufReader::new(File::open(archive)?));
    create_dir(dest)?;

    {
        let mut tar = Archive::new(&mut reader);
        for entry in tar.entries().map_err(malformed)? {
            let mut entry = entry.map_err(malformed)?;
            let path = entry.path().map_err(malformed)?.into_owned();
            let target = safe_join(dest, &path)?;
            let kind = entry.header().entry_type();

            if kind.is_dir() {
                create_dir(&target)?;
            } else if kind.is_file() {
                if let Some(parent) = target.parent() {
                    create_dir(parent)?;
                }
                let mode = entry.header().mode().unwrap_or(0o644);
                let mut file = create_file(&target, mode)?;
                copy_entry(&mut entry, &mut file, &path)?;
            } else {
                tracing::debug!(target: "service", path = %path.display(), ?kind, "Skipping archive entry");
            }
        }
    }

    // Trailing padding still belongs to the downloaded bytes.
    io::copy(&mut reader, &mut io::sink())?;
    let digest = reader.finish();

    let descriptor = find_descriptor(dest)?
        .ok_or(Error::ArchiveMalformed("no .ovf descriptor in archive".to_owned()))?;

    Ok((digest, descriptor))
}

/// Copies the entry data into `file`.
///
/// Read failures and short entries belong to the archive and surface as
/// `ArchiveMalformed`. Write failures stay I/O errors.
///
fn copy_entry<R: Read>(entry: &mut tar::Entry<'_, R>, file: &mut File, path: &Path) -> Result<()> {
    let expected = entry.header().size().map_err(malformed)?;
    let mut buf = [0u8; 64 * 1024];
    let mut copied = 0u64;
    loop {
        let read = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(malformed(e)),
        };
        file.write_all(&buf[..read])?;
        copied += read as u64;
    }
    if copied != expected {
        return Err(Error::ArchiveMalformed(format!(
            "entry '{}' truncated: {} of {} bytes",
            path.display(),
            copied,
            expected
        )));
    }
    Ok(())
}

/// Joins an archive entry path onto `root`, refusing anything that would land
/// outside of it.
///
pub(crate) fn safe_join(root: &Path, path: &Path) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::ArchiveMalformed(format!(
                    "entry '{}' escapes the staging directory",
                    path.display()
                )));
            }
        }
    }
    Ok(joined)
}

fn create_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path)
}

fn create_file(path: &Path, mode: u32) -> io::Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        // The owner must still be able to read it back for the upload.
        options.mode(mode | 0o600);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Depth-first walk in name order, returning the first `.ovf` file.
///
fn find_descriptor(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            if let Some(found) = find_descriptor(&path)? {
                return Ok(Some(found));
            }
        } else if path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("ovf"))
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
