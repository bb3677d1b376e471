//! Serving a directory over GET.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::http::mime::guess_content_type;
use crate::http::request::Method;
use crate::http::response::StatusCode;
use crate::http::transfer::Transfer;

/// Builds a request handler serving files under `root`.
///
/// Only `GET` is accepted. `/` serves `/index.html`. Anything that does not
/// resolve to a file inside `root` is a 404.
pub fn static_files(root: &Path) -> io::Result<impl Fn(&Transfer, &mut Transfer) -> anyhow::Result<()> + use<>> {
    let root = root.canonicalize()?;
    Ok(move |request: &Transfer, response: &mut Transfer| serve(&root, request, response))
}

fn serve(root: &Path, request: &Transfer, response: &mut Transfer) -> anyhow::Result<()> {
    if request.parse_method() != Some(Method::GET) {
        response.respond(StatusCode::MethodNotAllowed.as_u16(), "GET only")?;
        return Ok(());
    }
    let path = match request.path_only() {
        None | Some("/") => "/index.html",
        Some(path) => path,
    };
    let Some(local) = resolve(root, path) else {
        response.respond_with(StatusCode::NotFound)?;
        return Ok(());
    };
    match fs::read(&local) {
        Ok(body) => {
            let content_type = guess_content_type(Some(path), &body);
            response.set_header("Content-Type", content_type)?;
            response.set_body(body);
        }
        Err(_) => response.respond_with(StatusCode::NotFound)?,
    }
    Ok(())
}

/// Maps a request path onto `root`, refusing anything that lands outside it.
fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
    let local = root.join(path.trim_start_matches('/')).canonicalize().ok()?;
    if !local.starts_with(root) {
        warn!(path, "request escapes document root");
        return None;
    }
    local.is_file().then_some(local)
}
