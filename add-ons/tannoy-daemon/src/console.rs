//! Line-oriented operator console.

use anyhow::{anyhow, bail};
use std::str::FromStr;
use tannoy_core::{EngineEvent, EngineHandle, MicStream, RequestId};
use tannoy_voice::{list_output_devices, MicCapture, MicSession};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

pub const HELP: &str = "\
commands:
  say <text>        queue a text announcement
  mic               go live on the microphone
  release           release the microphone
  stop              stop whatever is playing
  volume <0.0-1.0>  set output volume
  chime on|off      toggle the pre-announcement chime
  bg on|off         toggle background audio
  resume            resume background audio after a stop
  cancel <id>       withdraw a queued announcement
  status            show engine state and queue
  devices           list audio input and output devices
  quit              shut down";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Say(String),
    Mic,
    Release,
    Stop,
    Volume(f32),
    Chime(bool),
    Background(bool),
    Resume,
    Cancel(u64),
    Status,
    Devices,
    Help,
    Quit,
}

fn parse_switch(arg: &str) -> anyhow::Result<bool> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => bail!("expected on|off, got {:?}", other),
    }
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let command = match word.to_ascii_lowercase().as_str() {
            "say" if rest.is_empty() => bail!("say needs a message"),
            "say" => ConsoleCommand::Say(rest.to_string()),
            "mic" => ConsoleCommand::Mic,
            "release" => ConsoleCommand::Release,
            "stop" => ConsoleCommand::Stop,
            "volume" => ConsoleCommand::Volume(
                rest.parse()
                    .map_err(|_| anyhow!("volume needs a number, got {:?}", rest))?,
            ),
            "chime" => ConsoleCommand::Chime(parse_switch(rest)?),
            "bg" | "background" => ConsoleCommand::Background(parse_switch(rest)?),
            "resume" => ConsoleCommand::Resume,
            "cancel" => ConsoleCommand::Cancel(
                rest.trim_start_matches('#')
                    .parse()
                    .map_err(|_| anyhow!("cancel needs a request id, got {:?}", rest))?,
            ),
            "status" => ConsoleCommand::Status,
            "devices" => ConsoleCommand::Devices,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            "" => bail!("empty command"),
            other => bail!("unknown command {:?} (try `help`)", other),
        };
        Ok(command)
    }
}

pub struct Console {
    handle: EngineHandle,
    capture: MicCapture,
    session: Option<MicSession>,
}

impl Console {
    pub fn new(handle: EngineHandle, capture: MicCapture) -> Self {
        Self {
            handle,
            capture,
            session: None,
        }
    }

    /// Read commands until `quit`, end of input, or CTRL-C.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = stdin_lines();
        println!("{}", HELP);
        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else {
                        info!("console input closed");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<ConsoleCommand>() {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => self.execute(command),
                        Err(e) => println!("error: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("CTRL-C received; shutting down");
                    break;
                }
            }
        }
        self.release_mic();
        Ok(())
    }

    fn execute(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Say(text) => match self.handle.announce_text(text) {
                Ok(id) => println!("queued {}", id),
                Err(e) => println!("error: {}", e),
            },
            ConsoleCommand::Mic => self.go_live(),
            ConsoleCommand::Release => {
                if !self.release_mic() {
                    println!("mic is not live");
                }
            }
            ConsoleCommand::Stop => {
                // Stop first so a live mic ends as Skipped, not Completed.
                self.handle.stop();
                self.release_mic();
            }
            ConsoleCommand::Volume(volume) => match self.handle.set_volume(volume) {
                Ok(()) => println!("volume {:.2}", volume),
                Err(e) => println!("error: {}", e),
            },
            ConsoleCommand::Chime(on) => self.handle.set_chime_enabled(on),
            ConsoleCommand::Background(on) => self.handle.set_background_enabled(on),
            ConsoleCommand::Resume => self.handle.resume_background(),
            ConsoleCommand::Cancel(id) => match self.handle.cancel(RequestId(id)) {
                Ok(()) => println!("cancelled {}", RequestId(id)),
                Err(e) => println!("error: {}", e),
            },
            ConsoleCommand::Status => {
                let settings = self.handle.settings();
                println!(
                    "state {:?} | queued {:?} | volume {:.2} chime {} background {} | mic {}",
                    self.handle.state(),
                    self.handle.queue().pending_ids(),
                    settings.volume,
                    settings.chime_enabled,
                    settings.background_enabled,
                    if self.session.is_some() { "live" } else { "off" },
                );
            }
            ConsoleCommand::Devices => print_devices(),
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
    }

    fn go_live(&mut self) {
        if self.session.is_some() {
            println!("mic is already live");
            return;
        }
        let (feed, stream) = MicStream::channel();
        let session = match self.capture.start(feed) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "mic capture failed to start");
                println!("error: {}", e);
                return;
            }
        };
        match self.handle.announce_mic(stream) {
            Ok(id) => {
                println!("mic live as {} (type `release` to end)", id);
                self.session = Some(session);
            }
            Err(e) => {
                session.release();
                println!("error: {}", e);
            }
        }
    }

    fn release_mic(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                session.release();
                true
            }
            None => false,
        }
    }
}

fn print_devices() {
    match MicCapture::list_input_devices() {
        Ok(names) => println!("input devices: {:?}", names),
        Err(e) => println!("error: {}", e),
    }
    match list_output_devices() {
        Ok(names) => println!("output devices: {:?}", names),
        Err(e) => println!("error: {}", e),
    }
}

/// Stdin lines read on a plain thread; tokio's stdin would keep the runtime
/// alive at exit while blocked on a read.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Print request outcomes for the operator.
pub async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::RequestFinished {
                request_id,
                kind,
                status,
                detail,
            }) => match detail {
                Some(detail) => println!("{} {:?}: {:?} ({})", request_id, kind, status, detail),
                None => println!("{} {:?}: {:?}", request_id, kind, status),
            },
            Ok(EngineEvent::LogAppendFailed { request_id, reason }) => {
                println!("warning: {} not written to the log: {}", request_id, reason)
            }
            Ok(EngineEvent::ScheduleDeferred { entry_id, reason }) => {
                println!("schedule entry {} deferred: {}", entry_id, reason)
            }
            Ok(EngineEvent::StateChanged(_)) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "console fell behind the event stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
