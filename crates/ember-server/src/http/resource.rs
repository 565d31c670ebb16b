//! Route handling and resolution of request targets to files.

use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, info, warn};

use super::parser::{Method, Request};
use crate::directory::UserDirectory;

/// Form body of the login and registration routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Parses `user=<name>&password=<password>`.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(body).ok()?;
        let (user, password) = text.strip_prefix("user=")?.split_once("&password=")?;
        Some(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}

/// Picks the file a request is served from.
///
/// The first byte of the last path segment selects a route: `2` and `3` on a
/// `POST` run login and registration against `directory`, and `0`, `1`, `5`,
/// `6`, `7` name fixed pages. Anything else is served as-is. Returns `None`
/// if a login or registration form is malformed.
pub fn route(request: &Request, directory: &dyn UserDirectory) -> Option<String> {
    let selector = request
        .target
        .rsplit('/')
        .next()
        .and_then(|segment| segment.bytes().next());

    let page = match (selector, request.method) {
        (Some(b'2'), Method::Post) => {
            let credentials = Credentials::parse(&request.body)?;
            if directory.authenticate(&credentials.user, &credentials.password) {
                info!(user = %credentials.user, "login accepted");
                "welcome.html"
            } else {
                info!(user = %credentials.user, "login rejected");
                "logError.html"
            }
        }
        (Some(b'3'), Method::Post) => {
            let credentials = Credentials::parse(&request.body)?;
            if directory.register(&credentials.user, &credentials.password) {
                info!(user = %credentials.user, "user registered");
                "log.html"
            } else {
                info!(user = %credentials.user, "registration rejected, name taken");
                "registerError.html"
            }
        }
        (Some(b'0'), _) => "register.html",
        (Some(b'1'), _) => "log.html",
        (Some(b'5'), _) => "picture.html",
        (Some(b'6'), _) => "video.html",
        (Some(b'7'), _) => "fans.html",
        _ => return Some(request.target.clone()),
    };

    Some(format!("/{page}"))
}

/// Where a target ended up on disk.
#[derive(Debug)]
pub enum Resolution {
    /// A readable, non-empty file mapped into memory.
    File(Mmap),
    /// A readable file with no content.
    EmptyFile,
    /// Nothing at the path.
    NotFound,
    /// Not world-readable, unopenable, or escaping the document root.
    Forbidden,
    /// The target is a directory.
    Directory,
    /// The file exists but could not be mapped.
    Unmappable,
}

/// Resolves `target` under `doc_root`.
pub fn resolve(doc_root: &Path, target: &str) -> Resolution {
    if target.split('/').any(|segment| segment == "..") {
        debug!(target, "rejecting path traversal");
        return Resolution::Forbidden;
    }

    let path = doc_root.join(target.trim_start_matches('/'));
    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Resolution::NotFound,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "stat failed");
            return Resolution::Forbidden;
        }
    };

    if metadata.permissions().mode() & 0o004 == 0 {
        return Resolution::Forbidden;
    }
    if metadata.is_dir() {
        return Resolution::Directory;
    }
    if metadata.len() == 0 {
        return Resolution::EmptyFile;
    }

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "open failed");
            return Resolution::Forbidden;
        }
    };

    // SAFETY: the mapping is read-only and private to this response. Files
    // under the document root are not expected to be truncated while served.
    #[allow(unsafe_code)]
    let mapped = unsafe { Mmap::map(&file) };

    match mapped {
        Ok(mmap) => Resolution::File(mmap),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mmap failed");
            Resolution::Unmappable
        }
    }
}
