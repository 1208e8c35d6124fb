// Avatar interactive console
// Line-based REPL over a single avatar session

use avatar_session::{
    MediaSink, Outcome, PlaybackError, PresentationSurface, SessionController, SessionSnapshot,
    SurfaceIntent, TalkRequest, TaskType,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// How long a cancelled start may take to unwind before it is abandoned
const START_UNWIND_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal presentation surface: reports media changes and errors
#[derive(Default)]
pub struct ConsoleSurface {
    sink: Mutex<Option<Arc<MediaSink>>>,
}

impl ConsoleSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationSurface for ConsoleSurface {
    fn attach_sink(&self, sink: Arc<MediaSink>) {
        println!("\n🎬 Avatar media attached ({} tracks)", sink.len());
        *self.sink.lock() = Some(sink);
    }

    fn detach_sink(&self) {
        if self.sink.lock().take().is_some() {
            println!("🎬 Avatar media detached");
        }
    }

    fn play(&self) -> Result<(), PlaybackError> {
        debug!("Playback requested");
        Ok(())
    }

    fn show_error(&self, message: &str) {
        println!("\n❌ {}", message);
    }
}

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Start,
    Stop,
    Say(String, TaskType),
    Status { json: bool },
    Help,
    Exit,
    Usage(&'static str),
}

impl ConsoleCommand {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let command = match head.to_lowercase().as_str() {
            "start" => ConsoleCommand::Start,
            "stop" => ConsoleCommand::Stop,
            "status" => ConsoleCommand::Status {
                json: rest.eq_ignore_ascii_case("json"),
            },
            "help" | "?" => ConsoleCommand::Help,
            "exit" | "quit" | "q" => ConsoleCommand::Exit,
            "talk" if rest.is_empty() => ConsoleCommand::Usage("Usage: talk <text>"),
            "talk" => ConsoleCommand::Say(rest.to_string(), TaskType::Talk),
            "repeat" if rest.is_empty() => ConsoleCommand::Usage("Usage: repeat <text>"),
            "repeat" => ConsoleCommand::Say(rest.to_string(), TaskType::Repeat),
            // Anything else is spoken as-is
            _ => ConsoleCommand::Say(line.to_string(), TaskType::Talk),
        };
        Some(command)
    }
}

enum CommandResult {
    Continue,
    Exit,
    Success(String),
    Error(String),
    Output(String),
}

pub struct AvatarConsole {
    controller: Arc<SessionController>,
    server_url: String,
    /// Texts whose dispatch has not completed yet
    pending: Arc<Mutex<HashSet<String>>>,
}

impl AvatarConsole {
    pub fn new(controller: Arc<SessionController>, server_url: String) -> Self {
        Self {
            controller,
            server_url,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run until `exit`, end of input or Ctrl-C, then tear the session down
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.print_banner();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            self.print_prompt()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };

            match self.handle_command(&line).await {
                CommandResult::Continue => continue,
                CommandResult::Exit => break,
                CommandResult::Success(msg) => println!("✅ {}", msg),
                CommandResult::Error(msg) => println!("❌ Error: {}", msg),
                CommandResult::Output(output) => println!("{}", output),
            }
        }

        self.controller.stop().await;
        self.controller.shutdown().await;
        println!("\n👋 Goodbye!");
        Ok(())
    }

    fn print_banner(&self) {
        println!("\n╔═══════════════════════════════════════════════╗");
        println!("║            Avatar Session Console             ║");
        println!("╚═══════════════════════════════════════════════╝");
        println!();
        println!("Streaming API: {}", self.server_url);
        println!("Type 'help' for available commands, 'exit' to quit");
        println!();
    }

    fn print_help(&self) {
        println!("📚 Available Commands:");
        println!("  start             - Start an avatar session");
        println!("  stop              - Stop the current session");
        println!("  talk <text>       - Have the avatar respond to text");
        println!("  repeat <text>     - Have the avatar repeat text verbatim");
        println!("  status [json]     - Show session state");
        println!("  help, ?           - Show this help message");
        println!("  exit, quit, q     - Stop the session and exit");
        println!();
        println!("💡 Any other line is sent as a talk task.");
    }

    fn print_prompt(&self) -> io::Result<()> {
        print!("avatar({})> ", self.controller.state());
        io::stdout().flush()
    }

    async fn handle_command(&self, line: &str) -> CommandResult {
        let Some(command) = ConsoleCommand::parse(line) else {
            return CommandResult::Continue;
        };

        match command {
            ConsoleCommand::Exit => CommandResult::Exit,
            ConsoleCommand::Help => {
                self.print_help();
                CommandResult::Continue
            }
            ConsoleCommand::Usage(usage) => CommandResult::Error(usage.to_string()),
            ConsoleCommand::Status { json: false } => {
                CommandResult::Output(format_snapshot(&self.controller.snapshot()))
            }
            ConsoleCommand::Status { json: true } => {
                match serde_json::to_string_pretty(&self.controller.snapshot()) {
                    Ok(output) => CommandResult::Output(output),
                    Err(e) => CommandResult::Error(e.to_string()),
                }
            }
            ConsoleCommand::Start => {
                println!("⏳ Starting session...");
                self.start_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
            }
            ConsoleCommand::Stop => match self.controller.handle_intent(SurfaceIntent::Stop).await {
                Ok(Outcome::Applied) => CommandResult::Success("Session stopped".to_string()),
                Ok(Outcome::Ignored(reason)) => CommandResult::Error(reason.to_string()),
                Err(_) => CommandResult::Continue,
            },
            ConsoleCommand::Say(text, task_type) => self.dispatch(&text, task_type),
        }
    }

    /// Start a session unless `cancel` resolves first, in which case the
    /// controller is shut down and the console exits
    async fn start_until<F: Future<Output = ()>>(&self, cancel: F) -> CommandResult {
        let controller = Arc::clone(&self.controller);
        let mut start =
            tokio::spawn(async move { controller.handle_intent(SurfaceIntent::Start).await });

        let result = tokio::select! {
            result = &mut start => result,
            _ = cancel => {
                println!();
                // A start in flight leaves its room once it sees the shutdown
                self.controller.shutdown().await;
                if tokio::time::timeout(START_UNWIND_TIMEOUT, &mut start).await.is_err() {
                    warn!("Abandoning session start after shutdown");
                    start.abort();
                }
                return CommandResult::Exit;
            }
        };

        match result {
            Ok(Ok(Outcome::Applied)) => {
                let id = self
                    .controller
                    .descriptor()
                    .map(|d| d.session_id)
                    .unwrap_or_default();
                CommandResult::Success(format!("Session {} started", id))
            }
            Ok(Ok(Outcome::Ignored(reason))) => CommandResult::Error(reason.to_string()),
            // Already shown by the surface
            Ok(Err(_)) => CommandResult::Continue,
            Err(e) => CommandResult::Error(e.to_string()),
        }
    }

    /// Send text in the background so the prompt stays responsive
    fn dispatch(&self, text: &str, task_type: TaskType) -> CommandResult {
        let Some(request) = TalkRequest::new(text, task_type) else {
            return CommandResult::Continue;
        };
        if !self.pending.lock().insert(request.text.clone()) {
            return CommandResult::Error("That text is still being sent".to_string());
        }

        let controller = Arc::clone(&self.controller);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            match controller.say(&request.text, request.task_type).await {
                Ok(Outcome::Applied) => debug!("{} task delivered", request.task_type),
                Ok(Outcome::Ignored(reason)) => println!("\n❌ Not sent: {}", reason),
                Err(_) => {}
            }
            pending.lock().remove(&request.text);
        });
        CommandResult::Continue
    }
}

fn format_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut out = format!("State:   {}", snapshot.state);
    if let Some(id) = &snapshot.session_id {
        out.push_str(&format!("\nSession: {}", id));
    }
    if let Some(url) = &snapshot.transport_url {
        out.push_str(&format!("\nRoom:    {}", url));
    }
    if let Some(started_at) = snapshot.started_at {
        let uptime = Utc::now().signed_duration_since(started_at);
        out.push_str(&format!("\nUptime:  {}s", uptime.num_seconds()));
    }
    out.push_str(&format!("\nTracks:  {}", snapshot.track_count));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use avatar_session::transport::LoopbackConnector;
    use avatar_session::{
        ControlPlane, ControllerTimeouts, SessionDescriptor, SessionError, SessionState, SessionToken,
    };

    /// Control plane whose token request is slow and then fails
    struct SlowControlPlane;

    #[async_trait]
    impl ControlPlane for SlowControlPlane {
        async fn issue_token(&self) -> Result<SessionToken, SessionError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err(SessionError::Network("unreachable".to_string()))
        }

        async fn create_session(
            &self,
            _token: &SessionToken,
            _avatar_id: &str,
        ) -> Result<SessionDescriptor, SessionError> {
            unreachable!("no token is ever issued")
        }

        async fn start_stream(&self, _token: &SessionToken, _session_id: &str) -> Result<(), SessionError> {
            unreachable!("no token is ever issued")
        }

        async fn send_task(
            &self,
            _token: &SessionToken,
            _session_id: &str,
            _text: &str,
            _task_type: TaskType,
        ) -> Result<(), SessionError> {
            unreachable!("no token is ever issued")
        }

        async fn stop_stream(&self, _token: &SessionToken, _session_id: &str) -> Result<(), SessionError> {
            unreachable!("no token is ever issued")
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("  "), None);
        assert_eq!(ConsoleCommand::parse("START"), Some(ConsoleCommand::Start));
        assert_eq!(ConsoleCommand::parse("q"), Some(ConsoleCommand::Exit));
        assert_eq!(
            ConsoleCommand::parse("status json"),
            Some(ConsoleCommand::Status { json: true })
        );
        assert_eq!(
            ConsoleCommand::parse("talk  Hello there "),
            Some(ConsoleCommand::Say("Hello there".to_string(), TaskType::Talk))
        );
        assert_eq!(
            ConsoleCommand::parse("repeat Good morning"),
            Some(ConsoleCommand::Say("Good morning".to_string(), TaskType::Repeat))
        );
        assert!(matches!(ConsoleCommand::parse("talk"), Some(ConsoleCommand::Usage(_))));
    }

    #[test]
    fn test_bare_text_is_talk() {
        assert_eq!(
            ConsoleCommand::parse("How are you?"),
            Some(ConsoleCommand::Say("How are you?".to_string(), TaskType::Talk))
        );
    }

    #[test]
    fn test_format_idle_snapshot() {
        let snapshot = SessionSnapshot {
            state: SessionState::Idle,
            session_id: None,
            transport_url: None,
            started_at: None,
            track_count: 0,
        };
        assert_eq!(format_snapshot(&snapshot), "State:   idle\nTracks:  0");
    }

    #[tokio::test]
    async fn test_interrupted_start_shuts_down_and_exits() {
        let controller = SessionController::new(
            Arc::new(SlowControlPlane),
            Arc::new(LoopbackConnector::new()),
            Arc::new(ConsoleSurface::new()),
            "avatar-1",
            ControllerTimeouts::default(),
        );
        let console = AvatarConsole::new(controller.clone(), "http://localhost".to_string());

        let result = console.start_until(async {}).await;
        assert!(matches!(result, CommandResult::Exit));
        assert!(controller.is_shut_down());
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_surface_detach_without_attach() {
        let surface = ConsoleSurface::new();
        surface.detach_sink();
        surface.attach_sink(Arc::new(MediaSink::new()));
        assert!(surface.sink.lock().is_some());
        surface.detach_sink();
        assert!(surface.sink.lock().is_none());
    }
}
