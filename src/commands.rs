//! Chat command interpreter.
//!
//! Every command is restricted to admin senders; anyone else gets no reply
//! and causes no side effect. Known commands are matched first, then the
//! configured shell keywords:
//!
//! | command                  | effect                                         |
//! |--------------------------|------------------------------------------------|
//! | `/status`                | state of every listed sensor                   |
//! | `/sensor`                | sensor selection menu                          |
//! | `/sensor NAME`           | sensor detail with subscribe/unsubscribe       |
//! | `/sensor NAME 1\|0`      | subscribe / unsubscribe                        |
//! | `/camera NAME`           | deliver the next clip from that camera         |
//! | `/video [FILE]`          | list or send stored recordings                 |
//! | `/photo`                 | ask the camera for a fresh snapshot            |
//! | `/help`                  | command overview                               |
//! | `/KEYWORD`               | run the mapped shell command in the background |

use crate::chat::{Button, ChatMessage, Content, OutgoingMessage, keyboard_rows};
use crate::dispatch::render;
use crate::sensors::{RecipientId, Registry, SensorKind};
use crate::tasks::TaskSupervisor;
use chrono::{NaiveDateTime, Utc};
use log::{debug, error, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Buttons per row in the recordings menu.
const VIDEO_BUTTONS_PER_ROW: usize = 7;
const SENSOR_BUTTONS_PER_ROW: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command<'a> {
    Status,
    Sensor {
        name: Option<&'a str>,
        subscribe: Option<bool>,
    },
    Camera(&'a str),
    Video(Option<&'a str>),
    Photo,
    Help,
}

/// Command word without the leading `/` or a trailing `@botname`.
fn command_word(word: &str) -> String {
    let word = word.strip_prefix('/').unwrap_or(word);
    let word = word.split_once('@').map_or(word, |(word, _)| word);
    word.to_ascii_lowercase()
}

/// Parse a known command. `Some(Err(usage))` means the command word was
/// recognised but its arguments were not.
fn parse(text: &str) -> Option<Result<Command<'_>, &'static str>> {
    let mut words = text.split_whitespace();
    let word = command_word(words.next()?);
    let args: Vec<&str> = words.collect();

    let command = match (word.as_str(), args.as_slice()) {
        ("status", _) => Ok(Command::Status),
        ("sensor", &[]) => Ok(Command::Sensor {
            name: None,
            subscribe: None,
        }),
        ("sensor", &[name]) => Ok(Command::Sensor {
            name: Some(name),
            subscribe: None,
        }),
        ("sensor", &[name, flag]) => match flag {
            "1" => Ok(Command::Sensor {
                name: Some(name),
                subscribe: Some(true),
            }),
            "0" => Ok(Command::Sensor {
                name: Some(name),
                subscribe: Some(false),
            }),
            _ => Err("Usage: /sensor [name] [0|1]"),
        },
        ("sensor", _) => Err("Usage: /sensor [name] [0|1]"),
        ("camera", &[name]) => Ok(Command::Camera(name)),
        ("camera", _) => Err("Usage: /camera name"),
        ("video", &[]) => Ok(Command::Video(None)),
        ("video", &[file]) => Ok(Command::Video(Some(file))),
        ("video", _) => Err("Usage: /video [file]"),
        ("photo", _) => Ok(Command::Photo),
        ("help" | "start", _) => Ok(Command::Help),
        _ => return None,
    };
    Some(command)
}

/// Result of interpreting one chat message.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Whether the message was consumed by a command.
    pub handled: bool,
    pub replies: Vec<OutgoingMessage>,
    /// Standing subscriptions changed and should be persisted.
    pub subscriptions_changed: bool,
}

impl Outcome {
    fn ignored() -> Self {
        Self::default()
    }

    fn reply(message: OutgoingMessage) -> Self {
        Self {
            handled: true,
            replies: vec![message],
            subscriptions_changed: false,
        }
    }

    fn silent() -> Self {
        Self {
            handled: true,
            ..Self::default()
        }
    }
}

/// Settings the interpreter needs beyond the registry.
#[derive(Debug, Clone, Default)]
pub struct CommandSettings {
    pub admins: BTreeSet<i64>,
    /// Shell keyword to command line.
    pub shell: BTreeMap<String, String>,
    pub video_dir: PathBuf,
    pub snapshot_url: Option<String>,
}

pub struct CommandInterpreter {
    settings: CommandSettings,
    http: reqwest::Client,
}

impl CommandInterpreter {
    pub fn new(settings: CommandSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_authorized(&self, sender: i64) -> bool {
        self.settings.admins.contains(&sender)
    }

    /// Interpret `message`, mutating sensors or launching tasks as needed.
    pub fn handle(
        &self,
        message: &ChatMessage,
        registry: &mut Registry,
        supervisor: &mut TaskSupervisor,
    ) -> Outcome {
        if !self.is_authorized(message.sender) {
            debug!("[Chat] Ignoring message from unauthorized sender {}", message.sender);
            return Outcome::ignored();
        }

        match parse(&message.text) {
            Some(Ok(command)) => self.execute(command, message, registry),
            Some(Err(usage)) => Outcome::reply(OutgoingMessage::text(message.chat, usage)),
            None => self.run_shell(message, supervisor),
        }
    }

    fn execute(&self, command: Command<'_>, message: &ChatMessage, registry: &mut Registry) -> Outcome {
        let chat = message.chat;
        match command {
            Command::Status => Outcome::reply(status(registry, chat)),
            Command::Sensor { name: None, .. } => Outcome::reply(sensor_menu(registry, chat)),
            Command::Sensor {
                name: Some(name),
                subscribe,
            } => {
                let edit = message.message_id.filter(|_| message.from_button);
                let Some(sensor) = registry.get_mut(name).filter(|s| s.is_listed()) else {
                    return Outcome::reply(OutgoingMessage::text(
                        chat,
                        format!("Unknown sensor: {}", name),
                    ));
                };

                match subscribe {
                    None => {
                        let subscribed = sensor.is_subscribed(chat);
                        let text = format!(
                            "{}\n{}",
                            render::status_line(sensor, Utc::now()),
                            if subscribed { "Subscribed" } else { "Not subscribed" }
                        );
                        let button = if subscribed {
                            Button::new("Unsubscribe", format!("/sensor {} 0", name))
                        } else {
                            Button::new("Subscribe", format!("/sensor {} 1", name))
                        };
                        Outcome::reply(
                            OutgoingMessage::text(chat, text)
                                .with_keyboard(vec![vec![button]])
                                .editing(edit),
                        )
                    }
                    Some(add) => {
                        let (changed, text) = if add {
                            (sensor.add_subscription(chat), format!("Subscribed to {}", name))
                        } else {
                            (
                                sensor.remove_subscription(chat),
                                format!("Unsubscribed from {}", name),
                            )
                        };
                        Outcome {
                            handled: true,
                            replies: vec![OutgoingMessage::text(chat, text).editing(edit)],
                            subscriptions_changed: changed,
                        }
                    }
                }
            }
            Command::Camera(name) => {
                let text = match registry.get_mut(name) {
                    Some(sensor) if sensor.kind() == SensorKind::Camera && sensor.is_listed() => {
                        if sensor.request_next(chat) {
                            format!("Next video from {} will be sent here", name)
                        } else {
                            format!("Already waiting for the next video from {}", name)
                        }
                    }
                    _ => format!("Unknown camera: {}", name),
                };
                Outcome::reply(OutgoingMessage::text(chat, text))
            }
            Command::Video(None) => Outcome::reply(self.video_menu(chat)),
            Command::Video(Some(file)) => Outcome::reply(self.video_file(chat, file)),
            Command::Photo => self.request_snapshot(chat),
            Command::Help => Outcome::reply(OutgoingMessage::text(chat, self.help_text())),
        }
    }

    fn run_shell(&self, message: &ChatMessage, supervisor: &mut TaskSupervisor) -> Outcome {
        let Some(first) = message.text.split_whitespace().next() else {
            return Outcome::ignored();
        };
        let Some(command_line) = self.settings.shell.get(&command_word(first)) else {
            return Outcome::ignored();
        };

        // TODO: tell the requesting chat when the command cannot be started
        if let Err(e) = supervisor.launch(command_line, message.chat, &message.text) {
            error!("[Tasks] Failed to start '{}': {}", command_line, e);
        }
        Outcome::silent()
    }

    fn video_menu(&self, chat: RecipientId) -> OutgoingMessage {
        let recordings = match list_recordings(&self.settings.video_dir) {
            Ok(recordings) => recordings,
            Err(e) => {
                warn!(
                    "[Chat] Cannot read recordings in {:?}: {}",
                    self.settings.video_dir, e
                );
                return OutgoingMessage::text(chat, "Recordings are not available");
            }
        };
        if recordings.is_empty() {
            return OutgoingMessage::text(chat, "No recordings");
        }

        let buttons = recordings
            .iter()
            .map(|(name, at)| Button::new(at.format("%H:%M").to_string(), format!("/video {}", name)))
            .collect();
        OutgoingMessage::text(chat, "Which video?")
            .with_keyboard(keyboard_rows(buttons, VIDEO_BUTTONS_PER_ROW))
    }

    fn video_file(&self, chat: RecipientId, file: &str) -> OutgoingMessage {
        let Some(at) = render::recording_timestamp(file) else {
            return OutgoingMessage::text(chat, format!("Not a recording: {}", file));
        };
        let path = self.settings.video_dir.join(file);
        if !path.is_file() {
            return OutgoingMessage::text(chat, format!("Recording not found: {}", file));
        }
        OutgoingMessage::new(
            chat,
            Content::VideoFile {
                path,
                caption: Some(at.format("%d.%m %H:%M").to_string()),
            },
        )
    }

    fn request_snapshot(&self, chat: RecipientId) -> Outcome {
        let Some(url) = self.settings.snapshot_url.clone() else {
            return Outcome::reply(OutgoingMessage::text(chat, "No snapshot URL configured"));
        };
        let request = self.http.get(&url);
        tokio::spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => debug!("[Chat] Snapshot requested from {}", url),
                Err(e) => warn!("[Chat] Snapshot request to {} failed: {}", url, e),
            }
        });
        Outcome::silent()
    }

    fn help_text(&self) -> String {
        let mut text = String::from(
            "/status - sensor states\n\
             /sensor [name] [0|1] - sensor details and subscriptions\n\
             /camera name - send the next video from a camera\n\
             /video [file] - stored recordings\n\
             /photo - take a snapshot",
        );
        for (keyword, command_line) in &self.settings.shell {
            text.push_str(&format!("\n/{} - runs `{}`", keyword, command_line));
        }
        text
    }
}

fn status(registry: &Registry, chat: RecipientId) -> OutgoingMessage {
    let now = Utc::now();
    let lines: Vec<String> = registry
        .listed()
        .map(|sensor| render::status_line(sensor, now))
        .collect();
    if lines.is_empty() {
        OutgoingMessage::text(chat, "No sensors configured")
    } else {
        OutgoingMessage::text(chat, lines.join("\n"))
    }
}

fn sensor_menu(registry: &Registry, chat: RecipientId) -> OutgoingMessage {
    let buttons: Vec<Button> = registry
        .listed()
        .map(|s| Button::new(s.name(), format!("/sensor {}", s.name())))
        .collect();
    if buttons.is_empty() {
        return OutgoingMessage::text(chat, "No sensors configured");
    }
    OutgoingMessage::text(chat, "Which sensor?")
        .with_keyboard(keyboard_rows(buttons, SENSOR_BUTTONS_PER_ROW))
}

/// Recordings in `dir`, newest first.
pub fn list_recordings(dir: &std::path::Path) -> std::io::Result<Vec<(String, NaiveDateTime)>> {
    let mut recordings: Vec<(String, NaiveDateTime)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| render::recording_timestamp(&name).map(|at| (name, at)))
        .collect();
    recordings.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(recordings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: i64 = 100;
    const STRANGER: i64 = 666;

    struct Fixture {
        interpreter: CommandInterpreter,
        registry: Registry,
        supervisor: TaskSupervisor,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let settings = CommandSettings {
                admins: BTreeSet::from([ADMIN]),
                shell: BTreeMap::from([("hello".to_string(), "echo hi".to_string())]),
                video_dir: dir.path().to_path_buf(),
                snapshot_url: None,
            };
            Self {
                interpreter: CommandInterpreter::new(settings),
                registry: Registry::from_urls(
                    &["binary://door", "camera://cam1", "dummy://ping"],
                    300,
                )
                .unwrap(),
                supervisor: TaskSupervisor::new(),
                _dir: dir,
            }
        }

        fn send(&mut self, sender: i64, text: &str) -> Outcome {
            self.send_message(ChatMessage::direct(sender, text))
        }

        fn send_message(&mut self, message: ChatMessage) -> Outcome {
            self.interpreter
                .handle(&message, &mut self.registry, &mut self.supervisor)
        }

        fn touch(&self, name: &str) {
            std::fs::write(self.interpreter.settings.video_dir.join(name), b"mp4").unwrap();
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/status"), Some(Ok(Command::Status)));
        assert_eq!(parse("/status@HomeBot"), Some(Ok(Command::Status)));
        assert_eq!(
            parse("/sensor door 1"),
            Some(Ok(Command::Sensor {
                name: Some("door"),
                subscribe: Some(true)
            }))
        );
        assert!(matches!(parse("/sensor door maybe"), Some(Err(_))));
        assert!(matches!(parse("/camera"), Some(Err(_))));
        assert_eq!(parse("/uptime"), None);
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let mut f = Fixture::new();

        let outcome = f.send(ADMIN, "/sensor door 1");
        assert!(outcome.handled);
        assert!(outcome.subscriptions_changed);
        assert_eq!(outcome.replies[0].as_text(), Some("Subscribed to door"));
        assert!(f.registry.get("door").unwrap().is_subscribed(ADMIN));

        let outcome = f.send(ADMIN, "/sensor door 0");
        assert!(outcome.subscriptions_changed);
        assert!(!f.registry.get("door").unwrap().is_subscribed(ADMIN));

        let outcome = f.send(ADMIN, "/sensor door 0");
        assert!(!outcome.subscriptions_changed);
    }

    #[test]
    fn test_unauthorized_sender_is_ignored() {
        let mut f = Fixture::new();

        for text in ["/sensor door 1", "/status", "/camera cam1", "/hello"] {
            let outcome = f.send(STRANGER, text);
            assert!(!outcome.handled);
            assert!(outcome.replies.is_empty());
        }
        assert!(f.registry.get("door").unwrap().subscriptions().is_empty());
        assert!(f.registry.get("cam1").unwrap().one_time_subscriptions().is_empty());
        assert!(f.supervisor.is_empty());
    }

    #[test]
    fn test_status_lists_only_visible_sensors() {
        let mut f = Fixture::new();
        let outcome = f.send(ADMIN, "/status");
        assert_eq!(
            outcome.replies[0].as_text(),
            Some("door: never updated\ncam1: never updated")
        );
    }

    #[test]
    fn test_sensor_menu_and_detail() {
        let mut f = Fixture::new();

        let menu = f.send(ADMIN, "/sensor").replies.remove(0);
        let keyboard = menu.keyboard.unwrap();
        let callbacks: Vec<_> = keyboard[0].iter().map(|b| b.callback.as_str()).collect();
        assert_eq!(callbacks, vec!["/sensor door", "/sensor cam1"]);

        let detail = f
            .send_message(ChatMessage {
                message_id: Some(77),
                from_button: true,
                ..ChatMessage::direct(ADMIN, "/sensor door")
            })
            .replies
            .remove(0);
        assert_eq!(detail.edit_message_id, Some(77));
        assert_eq!(detail.keyboard.unwrap()[0][0].callback, "/sensor door 1");

        let unknown = f.send(ADMIN, "/sensor ping").replies.remove(0);
        assert_eq!(unknown.as_text(), Some("Unknown sensor: ping"));
    }

    #[test]
    fn test_camera_request_is_idempotent() {
        let mut f = Fixture::new();
        f.send(ADMIN, "/camera cam1");
        let outcome = f.send(ADMIN, "/camera cam1");
        assert!(outcome.replies[0].as_text().unwrap().starts_with("Already waiting"));
        assert_eq!(
            f.registry.get("cam1").unwrap().one_time_subscriptions(),
            &BTreeSet::from([ADMIN])
        );

        let outcome = f.send(ADMIN, "/camera door");
        assert_eq!(outcome.replies[0].as_text(), Some("Unknown camera: door"));
    }

    #[test]
    fn test_video_listing_newest_first() {
        let mut f = Fixture::new();
        f.touch("20230101_120000.mp4");
        f.touch("20230102_090000.mp4");
        f.touch("notes.txt");

        let menu = f.send(ADMIN, "/video").replies.remove(0);
        let keyboard = menu.keyboard.unwrap();
        let labels: Vec<_> = keyboard[0].iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["09:00", "12:00"]);
        assert_eq!(keyboard[0][0].callback, "/video 20230102_090000.mp4");
    }

    #[test]
    fn test_video_file_delivery() {
        let mut f = Fixture::new();
        f.touch("20230102_090000.mp4");

        let reply = f.send(ADMIN, "/video 20230102_090000.mp4").replies.remove(0);
        match reply.content {
            Content::VideoFile { path, caption } => {
                assert!(path.ends_with("20230102_090000.mp4"));
                assert_eq!(caption.as_deref(), Some("02.01 09:00"));
            }
            other => panic!("unexpected content {:?}", other),
        }

        let missing = f.send(ADMIN, "/video 20230103_090000.mp4").replies.remove(0);
        assert!(missing.as_text().unwrap().starts_with("Recording not found"));
        let traversal = f.send(ADMIN, "/video ../secret.mp4").replies.remove(0);
        assert!(traversal.as_text().unwrap().starts_with("Not a recording"));
    }

    #[test]
    fn test_empty_video_dir() {
        let mut f = Fixture::new();
        let reply = f.send(ADMIN, "/video").replies.remove(0);
        assert_eq!(reply.as_text(), Some("No recordings"));
    }

    #[tokio::test]
    async fn test_shell_fallback() {
        let mut f = Fixture::new();

        let outcome = f.send(ADMIN, "/hello");
        assert!(outcome.handled);
        assert!(outcome.replies.is_empty());
        assert_eq!(f.supervisor.len(), 1);

        let outcome = f.send(ADMIN, "/unknown");
        assert!(!outcome.handled);
        assert_eq!(f.supervisor.len(), 1);
    }

    #[test]
    fn test_photo_without_snapshot_url() {
        let mut f = Fixture::new();
        let reply = f.send(ADMIN, "/photo").replies.remove(0);
        assert_eq!(reply.as_text(), Some("No snapshot URL configured"));
    }

    #[test]
    fn test_help_lists_shell_keywords() {
        let mut f = Fixture::new();
        let reply = f.send(ADMIN, "/help").replies.remove(0);
        assert!(reply.as_text().unwrap().contains("/hello - runs `echo hi`"));
    }
}
