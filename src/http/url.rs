use url::{Position, Url};

use crate::error::ParseError;

/// The pieces of a URL that the engine needs to open a connection and write
/// a request line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UrlParts {
    pub scheme: String,
    pub host: String,
    /// Explicit port, else 80 for `http` and 443 for `https`, else 0.
    pub port: u16,
    /// Starts with `/` and includes the query.
    pub path: String,
    /// Begins with `#` when present.
    pub fragment: Option<String>,
}

/// Splits an absolute URL, or a bare `/path#fragment`.
///
/// # Example
///
/// ```
/// # use courier::http::url::split_url;
/// let parts = split_url("http://example.com:8080/a/b?x=1#top").unwrap();
/// assert_eq!(parts.host, "example.com");
/// assert_eq!(parts.port, 8080);
/// assert_eq!(parts.path, "/a/b?x=1");
/// assert_eq!(parts.fragment.as_deref(), Some("#top"));
/// ```
pub fn split_url(src: &str) -> Result<UrlParts, ParseError> {
    if src.starts_with('/') || src.starts_with('#') {
        return Ok(split_relative(src));
    }
    let url = Url::parse(src).map_err(|_| ParseError::InvalidUrl)?;
    let port = url.port().unwrap_or(match url.scheme() {
        "http" => 80,
        "https" => 443,
        _ => 0,
    });
    Ok(UrlParts {
        scheme: url.scheme().to_string(),
        host: url.host_str().unwrap_or_default().to_string(),
        port,
        path: url[Position::BeforePath..Position::AfterQuery].to_string(),
        fragment: url.fragment().map(|f| format!("#{f}")),
    })
}

fn split_relative(src: &str) -> UrlParts {
    let (path, fragment) = match src.find('#') {
        Some(i) => (&src[..i], Some(src[i..].to_string())),
        None => (src, None),
    };
    UrlParts {
        path: path.to_string(),
        fragment,
        ..UrlParts::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(split_url("http://h/").unwrap().port, 80);
        assert_eq!(split_url("https://h/").unwrap().port, 443);
        assert_eq!(split_url("gopher://h/").unwrap().port, 0);
    }

    #[test]
    fn test_bad_port_rejected() {
        assert_eq!(split_url("http://h:99999/"), Err(ParseError::InvalidUrl));
        assert_eq!(split_url("http://h:8o/"), Err(ParseError::InvalidUrl));
    }

    #[test]
    fn test_relative_path() {
        let parts = split_url("/only/path#frag").unwrap();
        assert!(parts.host.is_empty());
        assert_eq!(parts.path, "/only/path");
        assert_eq!(parts.fragment.as_deref(), Some("#frag"));
    }
}
