use std::io;
use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::State,
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::AppState;
use crate::archive;
use crate::error::ServeError;
use crate::listing;

/// GET / - index of registered roots.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let config = &state.config;
    Html(listing::render_index(
        &config.title,
        config.roots.keys().map(String::as_str),
    ))
}

/// Catch-all handler for everything under a root: directory listing, raw
/// file transfer, or (with `?tar`) a streaming archive of the subtree.
pub async fn browse(State(state): State<AppState>, uri: Uri) -> Result<Response, ServeError> {
    let (root_name, subpath) = split_request_path(uri.path())?;
    let root_dir = state
        .config
        .root(&root_name)
        .ok_or_else(|| ServeError::RootNotFound(root_name.clone()))?;

    let full_path = resolve_path(root_dir, &subpath)?;
    let meta = fs::metadata(&full_path)
        .await
        .map_err(|_| ServeError::ResourceNotFound(uri.path().to_string()))?;

    if meta.is_dir() {
        if wants_tar(uri.query()) {
            return tar_response(&root_name, &subpath, full_path).await;
        }
        listing_response(&root_name, &subpath, &full_path)
    } else {
        file_response(&full_path, meta.len()).await
    }
}

/// Split a request path into (root name, subpath), percent-decoding both.
/// The subpath keeps its internal slashes; a trailing slash is dropped.
fn split_request_path(path: &str) -> Result<(String, String), ServeError> {
    let trimmed = path.trim_start_matches('/');
    let (root, rest) = match trimmed.split_once('/') {
        Some((root, rest)) => (root, rest),
        None => (trimmed, ""),
    };
    let decode = |segment: &str| {
        percent_decode_str(segment)
            .decode_utf8()
            .map(|s| s.into_owned())
            .map_err(|_| ServeError::ResourceNotFound(path.to_string()))
    };
    Ok((decode(root)?, decode(rest.trim_end_matches('/'))?))
}

/// Build the on-disk path for a decoded subpath, component by component.
/// Parent-directory and absolute components are rejected outright; they never
/// reach the filesystem even when they would resolve back inside the root.
fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, ServeError> {
    if relative.is_empty() || relative == "." {
        return Ok(root.to_path_buf());
    }

    let mut result = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    return Err(ServeError::PathEscape);
                }
                result.push(name);
            }
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ServeError::PathEscape);
            }
        }
    }

    if !result.starts_with(root) {
        return Err(ServeError::PathEscape);
    }

    Ok(result)
}

/// `?tar` triggers the archive download, with or without a value.
fn wants_tar(query: Option<&str>) -> bool {
    query.is_some_and(|q| {
        q.split('&')
            .any(|pair| pair.split('=').next() == Some("tar"))
    })
}

/// Download filename for a directory: `"` and `.` become `_`, like the
/// listing UI has always produced.
fn sanitize_download_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '.' { '_' } else { c })
        .collect()
}

fn listing_response(
    root_name: &str,
    subpath: &str,
    dir: &Path,
) -> Result<Response, ServeError> {
    let entries = listing::read_listing(dir)?;
    let mut title = root_name.to_string();
    if !subpath.is_empty() {
        title.push('/');
        title.push_str(subpath);
    }
    let base = format!("/{title}");
    Ok(Html(listing::render_listing(&title, &base, &entries)).into_response())
}

async fn file_response(path: &Path, size: u64) -> Result<Response, ServeError> {
    debug!("streaming file: {}", path.display());

    let file = fs::File::open(path).await?;
    let body = Body::from_stream(ReaderStream::new(file));
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        body,
    )
        .into_response())
}

/// Archive a whole subtree. The plan walk runs to completion first so the
/// exact Content-Length is known before any body byte; the producer task then
/// streams the same plan sequentially.
async fn tar_response(
    root_name: &str,
    subpath: &str,
    dir: PathBuf,
) -> Result<Response, ServeError> {
    let dir_name = subpath
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(root_name);
    let filename = format!("{}.tar", sanitize_download_name(dir_name));

    let plan = tokio::task::spawn_blocking(move || archive::build_plan(&dir))
        .await
        .map_err(|err| ServeError::Io(io::Error::other(err.to_string())))??;
    let total_size = archive::archive_size(&plan);

    debug!(entries = plan.len(), total_size, "streaming tar archive");

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);
    tokio::spawn(async move {
        if let Err(err) = archive::write_archive(plan, &tx).await {
            // Headers are already out; all we can do is cut the stream short.
            error!("tar stream aborted: {err}");
            let _ = tx.send(Err(err)).await;
        }
    });
    let body = Body::from_stream(ReceiverStream::new(rx));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/tar".to_string()),
            (header::CONTENT_LENGTH, total_size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}
