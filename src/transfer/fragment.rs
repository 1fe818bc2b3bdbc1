use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use reqwest::blocking::{Body, Client};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::object::{move_to_store, object_exists};
use crate::store::Store;
use crate::transfer::client::{check_status, with_retries, UploadUrls};

/// upload one fragment unless the registry already has it; returns bytes sent
///
/// the HEAD check and the PUT are each retried up to `retries` times on connection
/// errors and 5xx responses.
pub fn upload(
    http: &Client,
    store: &Store,
    hash: &Hash,
    urls: &UploadUrls,
    reupload: bool,
    retries: usize,
) -> Result<u64> {
    let what = hash.short();
    if !reupload {
        let present = with_retries(&what, retries, || {
            let status = http.head(&urls.head).send()?.status();
            Ok(status.is_success())
        })?;
        if present {
            debug!(fragment = %what, "already uploaded");
            return Ok(0);
        }
    }

    let compressed = gzip_object(store, hash)?;
    let len = compressed
        .as_file()
        .metadata()
        .with_path(compressed.path())?
        .len();
    with_retries(&what, retries, || {
        let body = Body::sized(compressed.reopen().with_path(compressed.path())?, len);
        check_status(http.put(&urls.put).body(body).send()?)
    })?;
    debug!(fragment = %what, bytes = len, "uploaded");
    Ok(len)
}

/// gzip a stored object into a temp file under the store's tmp dir
fn gzip_object(store: &Store, hash: &Hash) -> Result<tempfile::NamedTempFile> {
    let source = store.object_path(hash);
    let mut input = File::open(&source).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::ObjectNotFound(*hash),
        _ => Error::Io {
            path: source.clone(),
            source: e,
        },
    })?;
    let tmp_dir = store.tmp_path();
    let tmp = tempfile::NamedTempFile::new_in(&tmp_dir).with_path(&tmp_dir)?;
    let mut encoder = GzEncoder::new(tmp.as_file(), Compression::default());
    io::copy(&mut input, &mut encoder).with_path(&source)?;
    encoder.finish().with_path(tmp.path())?;
    Ok(tmp)
}

fn content_range_re() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^bytes (\d+)-(\d+)/(\d+)$"))
        .as_ref()
        .map_err(|e| Error::Build(e.to_string()))
}

/// check that a 206 response continues where the partial file ends
fn validate_content_range(header: Option<&str>, resume_from: u64) -> Result<()> {
    let invalid = |message: String| Error::Registry {
        status: StatusCode::PARTIAL_CONTENT.as_u16(),
        message,
    };
    let header = header.ok_or_else(|| invalid("missing Content-Range".to_string()))?;
    let caps = content_range_re()?
        .captures(header)
        .ok_or_else(|| invalid(format!("malformed Content-Range {:?}", header)))?;
    let start: u64 = caps[1]
        .parse()
        .map_err(|_| invalid(format!("malformed Content-Range {:?}", header)))?;
    if start != resume_from {
        return Err(invalid(format!(
            "Content-Range starts at {}, expected {}",
            start, resume_from
        )));
    }
    Ok(())
}

/// fetch `url` into `partial`, resuming from its current length
fn fetch(http: &Client, url: &str, partial: &Path) -> Result<()> {
    let have = fs::metadata(partial).map(|m| m.len()).unwrap_or(0);
    let mut request = http.get(url);
    if have > 0 {
        request = request.header(RANGE, format!("bytes={}-", have));
    }
    let mut response = request.send()?;

    let append = match response.status() {
        StatusCode::RANGE_NOT_SATISFIABLE if have > 0 => {
            debug!(path = %partial.display(), "download already complete");
            return Ok(());
        }
        StatusCode::PARTIAL_CONTENT => {
            let range = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok());
            validate_content_range(range, have)?;
            true
        }
        status if status.is_success() => {
            if have > 0 {
                debug!(path = %partial.display(), "server ignored range, restarting");
            }
            false
        }
        _ => {
            check_status(response)?;
            return Ok(());
        }
    };

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(partial)
        .with_path(partial)?;
    response.copy_to(&mut file)?;
    file.sync_all().with_path(partial)?;
    Ok(())
}

/// gunzip `partial` into `out`, returning the hash and size of what was written
///
/// fragments always travel gzipped and are decoded exactly once, whatever the
/// decoded bytes look like. the client is built without reqwest's gzip feature, so a
/// `Content-Encoding: gzip` response header never triggers a second decode and byte
/// ranges stay aligned with the compressed file.
fn unpack(partial: &Path, out: &Path) -> Result<(Hash, u64)> {
    let mut reader = GzDecoder::new(BufReader::new(File::open(partial).with_path(partial)?));
    let mut output = File::create(out).with_path(out)?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).with_path(partial)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n]).with_path(out)?;
        size += n as u64;
    }
    output.sync_all().with_path(out)?;
    Ok((Hash::from_bytes(hasher.finalize().into()), size))
}

fn partial_path(store: &Store, hash: &Hash) -> PathBuf {
    store.temporary_object_path(&format!("{}.gz", hash.to_hex()))
}

/// download one fragment into the object pool; returns bytes stored
///
/// a fragment already in the pool is trusted by path and skipped. partial downloads
/// are resumed with a byte range. connection errors and 5xx responses are retried up
/// to `retries` times. the partial file is removed once it has been unpacked, whether
/// or not unpacking succeeded.
pub fn download(http: &Client, store: &Store, hash: &Hash, url: &str, retries: usize) -> Result<u64> {
    if object_exists(store, hash) {
        debug!(fragment = %hash.short(), "already present");
        return Ok(0);
    }

    let partial = partial_path(store, hash);
    with_retries(&hash.short(), retries, || fetch(http, url, &partial))?;

    let out = store.temporary_object_path(&hash.to_hex());
    let unpacked = unpack(&partial, &out);
    // a corrupt partial would otherwise be answered with 416 on every later attempt
    let _ = fs::remove_file(&partial);
    let (actual, size) = match unpacked {
        Ok(unpacked) => unpacked,
        Err(e) => {
            warn!(fragment = %hash.short(), error = %e, "discarding undecodable download");
            let _ = fs::remove_file(&out);
            return Err(e);
        }
    };
    if actual != *hash {
        let _ = fs::remove_file(&out);
        return Err(Error::FragmentHashMismatch {
            expected: *hash,
            actual,
        });
    }
    move_to_store(store, &out, hash)?;
    info!(fragment = %hash.short(), bytes = size, "downloaded");
    Ok(size)
}
