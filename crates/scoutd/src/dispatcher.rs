//! Turns recognition reports and manual requests into actuator commands.

use crate::pipeline::FrameReport;
use scout_hw::{ActuatorChannel, Command};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

pub struct CommandDispatcher<C> {
    channel: C,
    open_cooldown: Duration,
    last_open: Option<Instant>,
}

impl<C: ActuatorChannel> CommandDispatcher<C> {
    pub fn new(channel: C, open_cooldown: Duration) -> Self {
        Self {
            channel,
            open_cooldown,
            last_open: None,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Send `Open` if a known face is present and the cooldown has elapsed.
    /// Returns whether a command was sent.
    pub fn on_recognition(&mut self, known_present: bool, now: Instant) -> bool {
        if !known_present {
            return false;
        }
        if let Some(last) = self.last_open {
            if now.saturating_duration_since(last) < self.open_cooldown {
                return false;
            }
        }
        self.deliver(Command::Open, now)
    }

    /// Forward an operator command unconditionally.
    pub fn manual(&mut self, command: Command, now: Instant) -> bool {
        self.deliver(command, now)
    }

    fn deliver(&mut self, command: Command, now: Instant) -> bool {
        if command == Command::Open {
            // cooldown runs from every Open attempt, delivered or not
            self.last_open = Some(now);
        }
        match self.channel.send(command) {
            Ok(()) => {
                tracing::info!(%command, channel = %self.channel.describe(), "command dispatched");
                true
            }
            Err(e) => {
                tracing::warn!(%command, error = %e, "actuator command failed");
                false
            }
        }
    }

    /// Run [`run`](Self::run) on a dedicated "scout-actuator" thread with its
    /// own single-threaded runtime, so a stalled device blocks only that
    /// thread. Joining yields the channel.
    pub fn spawn(
        self,
        reports: broadcast::Receiver<FrameReport>,
        manual: mpsc::Receiver<Command>,
    ) -> std::io::Result<JoinHandle<C>>
    where
        C: 'static,
    {
        std::thread::Builder::new()
            .name("scout-actuator".into())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread().build() {
                    Ok(runtime) => runtime.block_on(self.run(reports, manual)),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to start dispatcher runtime");
                        self.channel
                    }
                }
            })
    }

    /// Consume reports and manual commands until both inputs close, then
    /// hand back the channel. Sends block the calling thread.
    pub async fn run(
        mut self,
        mut reports: broadcast::Receiver<FrameReport>,
        mut manual: mpsc::Receiver<Command>,
    ) -> C {
        let mut reports_open = true;
        let mut manual_open = true;

        while reports_open || manual_open {
            tokio::select! {
                report = reports.recv(), if reports_open => match report {
                    Ok(report) => {
                        self.on_recognition(report.known_present, Instant::now());
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "dispatcher lagging behind pipeline");
                    }
                    Err(broadcast::error::RecvError::Closed) => reports_open = false,
                },
                command = manual.recv(), if manual_open => match command {
                    Some(command) => {
                        self.manual(command, Instant::now());
                    }
                    None => manual_open = false,
                },
            }
        }
        tracing::debug!("dispatcher exiting");
        self.channel
    }
}
