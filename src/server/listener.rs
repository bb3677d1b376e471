//! Routing rules: which handler serves which requests.

use std::fmt;
use std::rc::Rc;

use crate::http::connection::Connection;
use crate::http::request::Method;
use crate::http::transfer::Transfer;

pub type RequestHandler = Box<dyn Fn(&Transfer, &mut Transfer) -> anyhow::Result<()>>;
pub type ConnectHandler = Box<dyn Fn(&mut Connection, &Transfer) -> anyhow::Result<()>>;
pub type MessageHandler = Box<dyn Fn(&mut Connection, u8, &[u8]) -> anyhow::Result<()>>;
pub type Matcher = Box<dyn Fn(&Transfer) -> bool>;

pub enum Handler {
    /// Fills in the response for a matched request.
    Request(RequestHandler),
    /// Upgrades matched requests and then receives their frames.
    WebSocket {
        on_connect: Option<ConnectHandler>,
        on_message: Option<MessageHandler>,
    },
}

/// Finds the listener responsible for a request.
pub trait Router {
    fn find_listener(&self, request: &Transfer) -> Option<Rc<Listener>>;
}

impl Router for Vec<Rc<Listener>> {
    /// First match in registration order.
    fn find_listener(&self, request: &Transfer) -> Option<Rc<Listener>> {
        self.iter().find(|l| l.matches(request)).cloned()
    }
}

/// A routing rule.
///
/// A listener matches when the request method is in its method set (or the
/// set is empty), the path has its prefix at a segment boundary, and the
/// optional matcher agrees.
///
/// # Example
///
/// ```
/// # use courier::server::listener::Listener;
/// # use courier::http::request::Method;
/// let api = Listener::request(|_req, resp| {
///     resp.set_body("ok");
///     Ok(())
/// })
/// .with_method(Method::GET)
/// .with_prefix("/api/");
/// assert_eq!(api.prefix(), "/api");
/// ```
pub struct Listener {
    methods: Vec<Method>,
    prefix: String,
    matcher: Option<Matcher>,
    handler: Handler,
}

impl Listener {
    pub fn new(handler: Handler) -> Self {
        Self {
            methods: Vec::new(),
            prefix: String::new(),
            matcher: None,
            handler,
        }
    }

    pub fn request<F>(handler: F) -> Self
    where
        F: Fn(&Transfer, &mut Transfer) -> anyhow::Result<()> + 'static,
    {
        Self::new(Handler::Request(Box::new(handler)))
    }

    /// A WebSocket listener with no callbacks yet; see [`Listener::on_connect`]
    /// and [`Listener::on_message`].
    pub fn websocket() -> Self {
        Self::new(Handler::WebSocket {
            on_connect: None,
            on_message: None,
        })
        .with_method(Method::GET)
    }

    /// Runs once the 101 response has been queued.
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Connection, &Transfer) -> anyhow::Result<()> + 'static,
    {
        match &mut self.handler {
            Handler::WebSocket { on_connect, .. } => *on_connect = Some(Box::new(f)),
            Handler::Request(_) => {
                self.handler = Handler::WebSocket {
                    on_connect: Some(Box::new(f)),
                    on_message: None,
                }
            }
        }
        self
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Connection, u8, &[u8]) -> anyhow::Result<()> + 'static,
    {
        match &mut self.handler {
            Handler::WebSocket { on_message, .. } => *on_message = Some(Box::new(f)),
            Handler::Request(_) => {
                self.handler = Handler::WebSocket {
                    on_connect: None,
                    on_message: Some(Box::new(f)),
                }
            }
        }
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.add_method(method);
        self
    }

    pub fn add_method(&mut self, method: Method) {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.set_prefix(prefix);
        self
    }

    /// Trailing slashes are dropped, except for a lone `/`.
    pub fn set_prefix(&mut self, prefix: &str) {
        let trimmed = prefix.trim_end_matches('/');
        self.prefix = if trimmed.is_empty() && !prefix.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };
    }

    pub fn with_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Transfer) -> bool + 'static,
    {
        self.matcher = Some(Box::new(matcher));
        self
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.handler, Handler::WebSocket { .. })
    }

    pub fn matches(&self, request: &Transfer) -> bool {
        if !self.methods.is_empty() {
            match request.parse_method() {
                Some(method) if self.methods.contains(&method) => {}
                _ => return false,
            }
        }
        if !self.prefix.is_empty() {
            let Some(path) = request.path_only() else {
                return false;
            };
            let Some(rest) = path.strip_prefix(self.prefix.as_str()) else {
                return false;
            };
            if !rest.is_empty() && !rest.starts_with('/') {
                return false;
            }
        }
        self.matcher.as_ref().is_none_or(|m| m(request))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("methods", &self.methods)
            .field("prefix", &self.prefix)
            .field("websocket", &self.is_websocket())
            .finish()
    }
}
