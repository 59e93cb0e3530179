use std::sync::Arc;

use bytes::Bytes;
use flakeguard::{CoordinationStore, IdentityGenerator, SequenceGenerator, TimeSource};

use crate::server::resp::{Reply, Request};

/// A parsed request. Anything outside this set replies with an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Ping(Option<Bytes>),
    Quit,
    Select,
    Set,
    Del,
    Info,
    Incr,
    Unknown(String),
    Empty,
}

impl Command {
    pub fn parse(mut args: Request) -> Self {
        if args.is_empty() {
            return Self::Empty;
        }
        let name = args.remove(0);
        match name.to_ascii_lowercase().as_slice() {
            b"ping" => Self::Ping(args.into_iter().next()),
            b"quit" => Self::Quit,
            b"select" => Self::Select,
            b"set" => Self::Set,
            b"del" => Self::Del,
            b"info" => Self::Info,
            b"incr" => Self::Incr,
            _ => Self::Unknown(String::from_utf8_lossy(&name).into_owned()),
        }
    }
}

/// What the connection should do after writing the reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Continue(Reply),
    Close(Reply),
}

/// Answers commands from one shared generator.
///
/// `SELECT`, `SET` and `DEL` are accepted and ignored so that stock Redis
/// clients, which often issue them on connect, keep working.
pub struct CommandHandler<S, T, G>
where
    S: CoordinationStore,
    T: TimeSource,
    G: SequenceGenerator<T>,
{
    generator: Arc<IdentityGenerator<S, T, G>>,
    port: u16,
}

impl<S, T, G> CommandHandler<S, T, G>
where
    S: CoordinationStore,
    T: TimeSource,
    G: SequenceGenerator<T>,
{
    pub fn new(generator: Arc<IdentityGenerator<S, T, G>>, port: u16) -> Self {
        Self { generator, port }
    }

    pub async fn handle(&self, command: Command) -> Response {
        let reply = match command {
            Command::Ping(None) => Reply::PONG,
            Command::Ping(Some(msg)) => Reply::Bulk(msg),
            Command::Quit => return Response::Close(Reply::OK),
            Command::Select | Command::Set => Reply::OK,
            Command::Del => Reply::Integer(0),
            Command::Info => Reply::Bulk(self.info().into()),
            Command::Incr => self.incr().await,
            Command::Unknown(name) => Reply::error(format!("ERR unknown command '{name}'")),
            Command::Empty => Reply::error("ERR empty command"),
        };
        Response::Continue(reply)
    }

    async fn incr(&self) -> Reply {
        match self.generator.generate().await {
            // the top six bits of an ID are always clear, so it fits an i64
            Ok(id) => Reply::Integer(id.to_raw() as i64),
            Err(e) => {
                tracing::debug!(error = %e, "generation failed");
                Reply::error(format!("ERR {e}"))
            }
        }
    }

    fn info(&self) -> String {
        let config = self.generator.config();
        let stats = self.generator.stats();
        let last_watermark = stats
            .last_watermark
            .map_or_else(|| "none".to_owned(), |ts| ts.to_string());
        format!(
            "machine_id: {}\r\n   node_id: {}\r\n      port: {}\r\n\
             \r\n\
             # Generator\r\n\
             watermark_policy: {}\r\n\
             generated: {}\r\n\
             watermark_failures: {}\r\n\
             last_watermark: {}\r\n",
            config.machine_id(),
            config.node_id(),
            self.port,
            self.generator.policy(),
            stats.generated,
            stats.watermark_failures,
            last_watermark,
        )
    }
}
