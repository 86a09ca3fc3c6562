//! Motion/actuation commands and the channels that deliver them.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// The fixed command set understood by the robot controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    /// Grant access (open the door/latch).
    Open,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::Stop,
        Command::Open,
    ];

    /// Wire token, as the controller expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Forward => "Forward",
            Command::Backward => "Backward",
            Command::Left => "Left",
            Command::Right => "Right",
            Command::Stop => "Stop",
            Command::Open => "Open",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown command '{0}'")]
pub struct ParseCommandError(pub String);

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s.trim();
        Command::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(word))
            .ok_or_else(|| ParseCommandError(word.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("actuator channel {path} unavailable: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send '{command}': {source}")]
    Send {
        command: Command,
        #[source]
        source: std::io::Error,
    },
}

/// Sink for commands. Delivery is best-effort; callers log failures.
pub trait ActuatorChannel: Send {
    fn send(&mut self, command: Command) -> Result<(), ActuatorError>;

    fn describe(&self) -> String;
}

impl<C: ActuatorChannel + ?Sized> ActuatorChannel for Box<C> {
    fn send(&mut self, command: Command) -> Result<(), ActuatorError> {
        (**self).send(command)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Logs every command and keeps a record of what was sent.
#[derive(Debug, Default)]
pub struct SimulatedChannel {
    sent: Vec<Command>,
}

impl SimulatedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> &[Command] {
        &self.sent
    }
}

impl ActuatorChannel for SimulatedChannel {
    fn send(&mut self, command: Command) -> Result<(), ActuatorError> {
        tracing::info!(%command, "simulated actuator");
        self.sent.push(command);
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated".into()
    }
}

/// Writes one command per line (`Open\n`) to a serial device or FIFO.
///
/// The device is reopened on the next send after a write failure.
pub struct SerialChannel<W: Write + Send = File> {
    path: PathBuf,
    writer: Option<W>,
}

impl SerialChannel<File> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ActuatorError> {
        let path = path.into();
        let writer = open_device(&path)?;
        tracing::info!(path = %path.display(), "actuator channel opened");
        Ok(Self {
            path,
            writer: Some(writer),
        })
    }
}

impl<W: Write + Send> SerialChannel<W> {
    /// Wrap an already-open writer.
    pub fn from_writer(path: impl Into<PathBuf>, writer: W) -> Self {
        Self {
            path: path.into(),
            writer: Some(writer),
        }
    }

    pub fn writer(&self) -> Option<&W> {
        self.writer.as_ref()
    }
}

fn open_device(path: &Path) -> Result<File, ActuatorError> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| ActuatorError::Open {
            path: path.to_path_buf(),
            source,
        })
}

impl<W: Write + Send + Reopen> ActuatorChannel for SerialChannel<W> {
    fn send(&mut self, command: Command) -> Result<(), ActuatorError> {
        let mut writer = match self.writer.take() {
            Some(w) => w,
            None => W::reopen(&self.path)?,
        };

        writer
            .write_all(format!("{command}\n").as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|source| ActuatorError::Send { command, source })?;
        self.writer = Some(writer);
        tracing::debug!(%command, path = %self.path.display(), "command sent");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// How a [`SerialChannel`] reacquires its writer after a failure.
pub trait Reopen: Sized {
    fn reopen(path: &Path) -> Result<Self, ActuatorError>;
}

impl Reopen for File {
    fn reopen(path: &Path) -> Result<Self, ActuatorError> {
        open_device(path)
    }
}

#[cfg(test)]
impl Reopen for Vec<u8> {
    fn reopen(_: &Path) -> Result<Self, ActuatorError> {
        Ok(Vec::new())
    }
}

/// `"sim"` selects the simulated channel; anything else is a device path.
pub fn open_channel(target: &str) -> Result<Box<dyn ActuatorChannel>, ActuatorError> {
    if target.eq_ignore_ascii_case("sim") {
        Ok(Box::new(SimulatedChannel::new()))
    } else {
        Ok(Box::new(SerialChannel::open(target)?))
    }
}
