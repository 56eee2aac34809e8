//! Application dispatch: the CGI-style environment handed to applications,
//! and the pump that drives a response body one fragment per tick.
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use error::Error;
use http::{Buffer, Request};
use server::response::{Responder, SERVER};
use server::{App, Body, Scheme, Step};

/// The request environment an application receives: CGI variables plus the
/// server-side meta values.
#[derive(Debug)]
pub struct Environ {
    vars: HashMap<String, String>,
    scheme: Scheme,
    body: Vec<u8>,
    server_name: String,
}

impl Environ {
    /// Looks up a CGI variable (`REQUEST_METHOD`, `PATH_INFO`,
    /// `HTTP_HOST`, ...).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// The URL scheme the request arrived over.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// A readable stream over the request body.
    pub fn input(&self) -> io::Cursor<&[u8]> {
        io::Cursor::new(&self.body)
    }

    /// The raw request body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// A writable stream for application diagnostics.
    pub fn errors(&self) -> io::Stderr {
        io::stderr()
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_version(&self) -> &'static str {
        SERVER
    }

    /// This server runs one cooperative worker: no threads, no processes,
    /// and applications are invoked repeatedly.
    pub fn multithread(&self) -> bool {
        false
    }

    pub fn multiprocess(&self) -> bool {
        false
    }

    pub fn run_once(&self) -> bool {
        false
    }
}

/// Builds the environment for one parsed request.
pub fn build_environ(name: &str,
                     scheme: Scheme,
                     external: (&str, u16),
                     peer: SocketAddr,
                     request: &Request)
                     -> Environ {
    let mut vars = HashMap::new();

    vars.insert("REQUEST_METHOD".to_owned(), request.method.to_string());
    vars.insert("SERVER_NAME".to_owned(), external.0.to_owned());
    vars.insert("SERVER_PORT".to_owned(), external.1.to_string());
    vars.insert("SERVER_PROTOCOL".to_owned(), request.version.to_string());
    vars.insert("SCRIPT_NAME".to_owned(), String::new());
    vars.insert("PATH_INFO".to_owned(), request.path.clone());
    vars.insert("QUERY_STRING".to_owned(), request.query.clone());
    vars.insert("REMOTE_ADDR".to_owned(), peer.ip().to_string());
    vars.insert("CONTENT_TYPE".to_owned(),
                request.headers.get("content-type").unwrap_or("").to_owned());
    if let Some(length) = request.length {
        vars.insert("CONTENT_LENGTH".to_owned(), length.to_string());
    }

    // received headers, renamed HTTP_<UPPER_SNAKE>
    for (header, value) in request.headers.iter() {
        let key = format!("HTTP_{}", header.replace('-', "_").to_uppercase());
        vars.insert(key, value.to_owned());
    }

    Environ {
        vars: vars,
        scheme: scheme,
        body: request.body.clone(),
        server_name: name.to_owned(),
    }
}

/// Drives one application invocation to its finished response.
///
/// The application runs lazily: it is called on the first service tick, and
/// afterwards its body is pumped one fragment per tick so a single slow
/// response cannot monopolize the loop.
pub struct Dispatcher<B> {
    environ: Option<Environ>,
    body: Option<B>,
    responder: Responder,
    persisted: bool,
}

impl<B: Body> Dispatcher<B> {
    pub fn new(environ: Environ, chunkable: bool, persisted: bool) -> Dispatcher<B> {
        Dispatcher {
            environ: Some(environ),
            body: None,
            responder: Responder::new(chunkable),
            persisted: persisted,
        }
    }

    /// Whether the request behind this response asked to keep the
    /// connection open.
    pub fn persisted(&self) -> bool {
        self.persisted
    }

    pub fn ended(&self) -> bool {
        self.responder.ended()
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    /// One tick of progress. An error return means the connection is
    /// beyond saving and should be closed.
    pub fn service<A>(&mut self, app: &mut A, tx: &mut Buffer) -> ::Result<()>
        where A: App<Body = B>
    {
        if self.responder.ended() {
            return Ok(());
        }

        if self.body.is_none() {
            let environ = match self.environ.take() {
                Some(environ) => environ,
                None => return Err(Error::Declare("environment already consumed")),
            };
            self.body = Some(app.call(environ, self.responder.reply()));
        }

        // push-style writes drain ahead of yielded fragments
        for msg in self.responder.reply().take_pushed() {
            if !msg.is_empty() {
                self.responder.write(tx, &msg)?;
            }
        }
        if self.responder.satisfied() {
            return self.responder.end(tx);
        }

        let step = match self.body {
            Some(ref mut body) => body.next(),
            None => Step::End,
        };
        match step {
            Step::Chunk(msg) => {
                // an empty fragment is a cooperative yield
                if !msg.is_empty() {
                    self.responder.write(tx, &msg)?;
                    if self.responder.satisfied() {
                        self.responder.end(tx)?;
                    }
                }
                Ok(())
            }
            Step::End => self.responder.end(tx),
            Step::Error(err) => {
                if !self.responder.headed() {
                    self.responder.declare_error(tx, &err)
                } else {
                    error!("application error streaming body after headers sent: {}", err);
                    self.responder.end(tx)
                }
            }
            Step::Fail(err) => Err(Error::App(err)),
        }
    }

    /// Best-effort termination for an abrupt close: a chunked body that
    /// already committed its head still gets its terminator.
    pub fn close(&mut self, tx: &mut Buffer) {
        if self.responder.started() && !self.responder.ended() {
            let _ = self.responder.end(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Read;

    use error::{Error, HttpError};
    use http::{Buffer, Parser};
    use mock::mock_peer;
    use server::response::Reply;
    use server::{Body, Environ, Scheme, Step};

    use super::{build_environ, Dispatcher};

    fn request(raw: &[u8]) -> ::http::Request {
        let mut parser = Parser::new();
        let mut rx = Buffer::new();
        rx.extend(raw);
        parser.step(&mut rx, false).unwrap();
        parser.take()
    }

    fn environ(raw: &[u8]) -> Environ {
        build_environ("test.server", Scheme::Http, ("127.0.0.1", 8080),
                      mock_peer(), &request(raw))
    }

    #[test]
    fn test_build_environ() {
        let env = environ(
            b"POST /hello?name=john HTTP/1.1\r\nHost: x\r\n\
              Content-Type: text/plain\r\nContent-Length: 2\r\nX-Ray: on\r\n\r\nhi",
        );
        assert_eq!(env.get("REQUEST_METHOD"), Some("POST"));
        assert_eq!(env.get("SERVER_NAME"), Some("127.0.0.1"));
        assert_eq!(env.get("SERVER_PORT"), Some("8080"));
        assert_eq!(env.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(env.get("SCRIPT_NAME"), Some(""));
        assert_eq!(env.get("PATH_INFO"), Some("/hello"));
        assert_eq!(env.get("QUERY_STRING"), Some("name=john"));
        assert_eq!(env.get("REMOTE_ADDR"), Some("127.0.0.1"));
        assert_eq!(env.get("CONTENT_TYPE"), Some("text/plain"));
        assert_eq!(env.get("CONTENT_LENGTH"), Some("2"));
        assert_eq!(env.get("HTTP_HOST"), Some("x"));
        assert_eq!(env.get("HTTP_X_RAY"), Some("on"));
        assert_eq!(env.scheme(), Scheme::Http);
        assert!(!env.multithread());

        let mut body = String::new();
        env.input().read_to_string(&mut body).unwrap();
        assert_eq!(body, "hi");
    }

    /// A body that plays back a fixed script of steps.
    struct ScriptBody(VecDeque<Step>);

    impl Body for ScriptBody {
        fn next(&mut self) -> Step {
            self.0.pop_front().unwrap_or(Step::End)
        }
    }

    fn script(steps: Vec<Step>) -> ScriptBody {
        ScriptBody(steps.into_iter().collect())
    }

    #[test]
    fn test_pump_one_fragment_per_tick() {
        let mut app = |_env: Environ, reply: Reply| {
            reply.declare(200, vec![]).unwrap();
            script(vec![
                Step::Chunk(Vec::new()),       // cooperative yield
                Step::Chunk(b"hello".to_vec()),
                Step::End,
            ])
        };
        let env = environ(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut dispatcher = Dispatcher::new(env, true, true);
        let mut tx = Buffer::new();

        // tick 1: app invoked, yield; nothing on the wire yet
        dispatcher.service(&mut app, &mut tx).unwrap();
        assert!(tx.is_empty());
        assert!(!dispatcher.ended());

        // tick 2: first real fragment commits the head
        dispatcher.service(&mut app, &mut tx).unwrap();
        assert!(!tx.is_empty());
        assert!(!dispatcher.ended());

        // tick 3: end of body
        dispatcher.service(&mut app, &mut tx).unwrap();
        assert!(dispatcher.ended());
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.contains("5\r\nhello\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_only_yields_then_end_is_empty_response() {
        let mut app = |_env: Environ, reply: Reply| {
            reply.declare(200, vec![]).unwrap();
            script(vec![Step::Chunk(Vec::new()), Step::Chunk(Vec::new()), Step::End])
        };
        let env = environ(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut dispatcher = Dispatcher::new(env, true, true);
        let mut tx = Buffer::new();
        for _ in 0..3 {
            dispatcher.service(&mut app, &mut tx).unwrap();
        }
        assert!(dispatcher.ended());
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_http_error_before_head() {
        let mut app = |_env: Environ, reply: Reply| {
            reply.declare(200, vec![]).unwrap();
            script(vec![Step::Error(HttpError::with_body(404, "Not Found", b"nope"))])
        };
        let env = environ(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut dispatcher = Dispatcher::new(env, true, true);
        let mut tx = Buffer::new();
        dispatcher.service(&mut app, &mut tx).unwrap();
        assert!(dispatcher.ended());
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\nnope"));
    }

    #[test]
    fn test_http_error_after_head_only_logs() {
        let mut app = |_env: Environ, reply: Reply| {
            reply.declare(200, vec![]).unwrap();
            script(vec![
                Step::Chunk(b"partial".to_vec()),
                Step::Error(HttpError::new(500, "Mid-Stream")),
            ])
        };
        let env = environ(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut dispatcher = Dispatcher::new(env, true, true);
        let mut tx = Buffer::new();
        dispatcher.service(&mut app, &mut tx).unwrap();
        dispatcher.service(&mut app, &mut tx).unwrap();
        assert!(dispatcher.ended());
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        // the committed 200 head stands; the stream just ends
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!text.contains("Mid-Stream"));
    }

    #[test]
    fn test_unstructured_failure_aborts() {
        let mut app = |_env: Environ, reply: Reply| {
            reply.declare(200, vec![]).unwrap();
            script(vec![Step::Fail("exploded".into())])
        };
        let env = environ(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut dispatcher = Dispatcher::new(env, true, true);
        let mut tx = Buffer::new();
        match dispatcher.service(&mut app, &mut tx) {
            Err(Error::App(e)) => assert_eq!(e.to_string(), "exploded"),
            other => panic!("expected app error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_push_style_writes() {
        let mut app = |_env: Environ, reply: Reply| {
            reply.declare(200, vec![]).unwrap();
            reply.push(b"pushed").unwrap();
            script(vec![Step::End])
        };
        let env = environ(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut dispatcher = Dispatcher::new(env, true, true);
        let mut tx = Buffer::new();
        dispatcher.service(&mut app, &mut tx).unwrap();
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.contains("6\r\npushed\r\n"));
    }

    #[test]
    fn test_declared_length_satisfaction_ends_response() {
        let mut app = |_env: Environ, reply: Reply| {
            reply.declare(200, vec![("Content-Length".to_owned(), "4".to_owned())])
                .unwrap();
            // more steps than the length allows; the dispatcher must not
            // wait for an explicit End
            script(vec![Step::Chunk(b"toolong".to_vec()),
                        Step::Chunk(b"extra".to_vec())])
        };
        let env = environ(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut dispatcher = Dispatcher::new(env, true, false);
        let mut tx = Buffer::new();
        dispatcher.service(&mut app, &mut tx).unwrap();
        assert!(dispatcher.ended());
        let text = String::from_utf8_lossy(tx.bytes()).into_owned();
        assert!(text.ends_with("\r\n\r\ntool"));
    }
}
