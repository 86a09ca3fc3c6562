//! Line-oriented operator console on stdin.
//!
//! ```text
//! forward | backward | left | right | stop | open
//! capture <label>
//! quit
//! ```

use crate::enrollment::{EnrollOutcome, EnrollmentFlow};
use scout_core::FaceEmbedder;
use scout_hw::actuator::ParseCommandError;
use scout_hw::Command;
use std::io::BufRead;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleRequest {
    Command(Command),
    /// Enroll the current face; `None` when no label was given.
    Capture(Option<String>),
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleRequest>, ParseCommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let request = if word.eq_ignore_ascii_case("capture") {
        ConsoleRequest::Capture((!rest.is_empty()).then(|| rest.to_string()))
    } else if word.eq_ignore_ascii_case("quit") {
        ConsoleRequest::Quit
    } else {
        ConsoleRequest::Command(line.parse()?)
    };
    Ok(Some(request))
}

/// Serve requests from `input` until `quit` or end of input.
///
/// `quit` fires only on an explicit `quit`; running with stdin closed leaves
/// the daemon up.
pub fn serve<R, E>(
    input: R,
    commands: mpsc::Sender<Command>,
    enrollment: &EnrollmentFlow<E>,
    quit: oneshot::Sender<()>,
) where
    R: BufRead,
    E: FaceEmbedder,
{
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                break;
            }
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleRequest::Command(command))) => {
                if commands.blocking_send(command).is_err() {
                    tracing::warn!(%command, "dispatcher gone; command dropped");
                }
            }
            Ok(Some(ConsoleRequest::Capture(label))) => match enrollment.capture(|| label) {
                Ok(EnrollOutcome::Enrolled { label, path }) => {
                    println!("enrolled {label} ({})", path.display());
                }
                Ok(EnrollOutcome::NoFrame) => println!("no frame available yet"),
                Ok(EnrollOutcome::NoFace) => println!("no face detected"),
                Ok(EnrollOutcome::Cancelled) => println!("capture cancelled: label required"),
                Err(e) => {
                    tracing::warn!(error = %e, "enrollment failed");
                    println!("enrollment failed: {e}");
                }
            },
            Ok(Some(ConsoleRequest::Quit)) => {
                let _ = quit.send(());
                return;
            }
            Err(e) => println!("{e}; expected forward|backward|left|right|stop|open, capture <label>, quit"),
        }
    }
    tracing::debug!("console input closed");
}
