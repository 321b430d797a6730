//! Fake Redis backend speaking enough RESP to run the exporter end to end.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use infoscrape::{
    client::{resp::read_value, RespValue},
    testing::samples,
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Debug, Default)]
struct State {
    password: Option<String>,
    databases: BTreeMap<u32, BTreeMap<String, String>>,
    connected_clients: usize,
    commands: Vec<String>,
}

/// Per-connection session state.
#[derive(Debug)]
struct Session {
    database: u32,
    authenticated: bool,
}

fn simple(status: &str) -> Vec<u8> {
    format!("+{status}\r\n").into_bytes()
}

fn error(message: &str) -> Vec<u8> {
    format!("-{message}\r\n").into_bytes()
}

fn bulk(text: &str) -> Vec<u8> {
    let mut reply = format!("${}\r\n", text.len()).into_bytes();
    reply.extend_from_slice(text.as_bytes());
    reply.extend_from_slice(b"\r\n");
    reply
}

impl State {
    fn info(&self, section: &str) -> String {
        match section.to_ascii_lowercase().as_str() {
            "clients" => format!(
                "# Clients\r\nconnected_clients:{}\r\nclient_recent_max_input_buffer:0\r\nblocked_clients:0\r\n",
                self.connected_clients
            ),
            "memory" => samples::MEMORY.replace('\n', "\r\n"),
            "server" => "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\nuptime_in_seconds:42\r\n"
                .to_owned(),
            "keyspace" => {
                let mut text = String::from("# Keyspace\r\n");
                for (index, keys) in &self.databases {
                    if !keys.is_empty() {
                        let count = keys.len();
                        write!(text, "db{index}:keys={count},expires=0,avg_ttl=0\r\n").ok();
                    }
                }
                text
            }
            _ => String::new(),
        }
    }

    fn execute(&mut self, session: &mut Session, args: &[String]) -> Vec<u8> {
        let Some(command) = args.first() else {
            return error("ERR empty command");
        };
        let command = command.to_ascii_uppercase();
        self.commands.push(command.clone());

        if command == "AUTH" {
            return match (&self.password, args.get(1)) {
                (Some(expected), Some(provided)) if expected == provided => {
                    session.authenticated = true;
                    simple("OK")
                }
                (None, _) => error("ERR AUTH called without any password configured"),
                _ => error("WRONGPASS invalid username-password pair"),
            };
        }
        if !session.authenticated {
            return error("NOAUTH Authentication required.");
        }

        match (command.as_str(), &args[1..]) {
            ("SELECT", [index]) => match index.parse() {
                Ok(index) => {
                    session.database = index;
                    simple("OK")
                }
                Err(_) => error("ERR value is not an integer or out of range"),
            },
            ("SET", [key, value]) => {
                self.databases
                    .entry(session.database)
                    .or_default()
                    .insert(key.clone(), value.clone());
                simple("OK")
            }
            ("INFO", [section]) => bulk(&self.info(section)),
            _ => error(&format!("ERR unknown command '{command}'")),
        }
    }
}

fn command_args(value: RespValue) -> io::Result<Vec<String>> {
    let RespValue::Array(items) = value else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "command is not an array"));
    };
    items
        .into_iter()
        .map(|item| match item {
            RespValue::BulkString(bytes) => String::from_utf8(bytes)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected {} in command", other.kind()),
            )),
        })
        .collect()
}

/// Fake Redis server listening on a random local port. Stops accepting connections when dropped.
#[derive(Debug)]
pub struct FakeRedis {
    local_addr: SocketAddr,
    state: Arc<Mutex<State>>,
    accept_task: JoinHandle<()>,
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl FakeRedis {
    /// Starts a server. If `password` is specified, clients must `AUTH` before other commands.
    ///
    /// # Errors
    ///
    /// Proxies I/O errors when binding the listener.
    pub async fn spawn(password: Option<&str>) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(State {
            password: password.map(str::to_owned),
            ..State::default()
        }));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    if let Err(err) = Self::serve(stream, &state).await {
                        tracing::warn!(%err, "Error serving fake Redis connection");
                    }
                });
            }
        });

        Ok(Self {
            local_addr,
            state,
            accept_task,
        })
    }

    fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
        state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn serve(stream: TcpStream, state: &Mutex<State>) -> io::Result<()> {
        let mut session = Session {
            database: 0,
            authenticated: Self::lock(state).password.is_none(),
        };
        Self::lock(state).connected_clients += 1;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let result = loop {
            let command = match read_value(&mut reader).await {
                Ok(command) => command,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
                Err(err) => break Err(err),
            };
            let reply = match command_args(command) {
                Ok(args) => Self::lock(state).execute(&mut session, &args),
                Err(err) => break Err(err),
            };
            if let Err(err) = writer.write_all(&reply).await {
                break Err(err);
            }
        };

        Self::lock(state).connected_clients -= 1;
        result
    }

    /// Returns the address in the `host:port` form.
    pub fn address(&self) -> String {
        self.local_addr.to_string()
    }

    /// Sets a key in the specified database.
    pub fn insert(&self, database: u32, key: &str, value: &str) {
        Self::lock(&self.state)
            .databases
            .entry(database)
            .or_default()
            .insert(key.to_owned(), value.to_owned());
    }

    /// Returns the value of a key in the specified database.
    pub fn get(&self, database: u32, key: &str) -> Option<String> {
        Self::lock(&self.state)
            .databases
            .get(&database)?
            .get(key)
            .cloned()
    }

    /// Returns names of all commands received so far.
    pub fn commands(&self) -> Vec<String> {
        Self::lock(&self.state).commands.clone()
    }

    /// Returns the number of currently open client connections.
    pub fn connected_clients(&self) -> usize {
        Self::lock(&self.state).connected_clients
    }
}
