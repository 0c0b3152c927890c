use std::collections::HashSet;
use std::num::ParseFloatError;
use std::path::PathBuf;
use std::sync::Arc;

use blink_core::{
    AttachmentFile, Authorship, ContactList, ImagePayload, KeyPress, Message, NoticeKind, PeerId,
    Presence, ScrollMetrics, SendState, SessionError, SessionHandle, SessionNotice,
    SessionSnapshot, UserId,
};
use chrono::Local;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::settings::SettingsStore;

/// Trailing marker that turns Enter into a literal newline.
const CONTINUATION: char = '\\';

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Contacts,
    ToggleOnlineOnly,
    Open(String),
    Close,
    Attach(PathBuf),
    Detach,
    Scroll(ScrollMetrics),
    Latest,
    Retry,
    Quit,
    /// A typed line. `continues` means Shift+Enter rather than Enter.
    Text { text: String, continues: bool },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    #[snafu(display("unknown command `/{name}`, try /help"))]
    UnknownCommand { stage: &'static str, name: String },
    #[snafu(display("`/{command}` needs {expected}"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
        expected: &'static str,
    },
    #[snafu(display("`{value}` is not a number: {source}"))]
    InvalidNumber {
        stage: &'static str,
        value: String,
        source: ParseFloatError,
    },
}

pub fn parse_line(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.strip_prefix('/') else {
        return Ok(match line.strip_suffix(CONTINUATION) {
            Some(text) => ConsoleCommand::Text {
                text: text.to_string(),
                continues: true,
            },
            None => ConsoleCommand::Text {
                text: line.to_string(),
                continues: false,
            },
        });
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let command = match name {
        "help" => ConsoleCommand::Help,
        "contacts" => ConsoleCommand::Contacts,
        "online" => ConsoleCommand::ToggleOnlineOnly,
        "open" => ConsoleCommand::Open(
            parts
                .next()
                .context(MissingArgumentSnafu {
                    stage: "parse-open",
                    command: "open",
                    expected: "a contact id",
                })?
                .to_string(),
        ),
        "close" => ConsoleCommand::Close,
        "attach" => {
            let path = command
                .strip_prefix(name)
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .context(MissingArgumentSnafu {
                    stage: "parse-attach",
                    command: "attach",
                    expected: "a file path",
                })?;
            ConsoleCommand::Attach(PathBuf::from(path))
        }
        "detach" => ConsoleCommand::Detach,
        "scroll" => {
            let mut next_number = || -> Result<f32, ParseError> {
                let value = parts.next().context(MissingArgumentSnafu {
                    stage: "parse-scroll",
                    command: "scroll",
                    expected: "<top> <height> <viewport>",
                })?;
                value.parse::<f32>().context(InvalidNumberSnafu {
                    stage: "parse-scroll",
                    value: value.to_string(),
                })
            };
            let scroll_top = next_number()?;
            let scroll_height = next_number()?;
            let viewport_height = next_number()?;
            ConsoleCommand::Scroll(ScrollMetrics::new(
                scroll_top,
                scroll_height,
                viewport_height,
            ))
        }
        "latest" => ConsoleCommand::Latest,
        "retry" => ConsoleCommand::Retry,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => {
            return UnknownCommandSnafu {
                stage: "parse-command",
                name: other.to_string(),
            }
            .fail();
        }
    };
    Ok(command)
}

pub fn render_message(message: &Message, local_user_id: &UserId, contacts: &ContactList) -> String {
    let author = match message.authorship(local_user_id) {
        Authorship::Own => "You".to_string(),
        Authorship::Peer => contacts
            .get(&message.sender_id)
            .map(|peer| peer.display_name.clone())
            .unwrap_or_else(|| message.sender_id.to_string()),
    };
    let time = message.created_at.with_timezone(&Local).format("%H:%M");

    let mut line = format!("[{time}] {author}:");
    if let Some(image) = &message.image {
        line.push(' ');
        line.push_str(&render_image(image));
    }
    for (index, text_line) in message.text.lines().enumerate() {
        if index == 0 {
            line.push(' ');
        } else {
            line.push_str("\n        ");
        }
        line.push_str(text_line);
    }
    line
}

fn render_image(image: &ImagePayload) -> String {
    match image {
        ImagePayload::Inline { mime_type, bytes } => {
            format!("[image {mime_type}, {} bytes]", bytes.len())
        }
        ImagePayload::Remote { url } => format!("[image {url}]"),
    }
}

pub fn render_contacts(
    contacts: &ContactList,
    online: &HashSet<UserId>,
    online_only: bool,
    local_user_id: &UserId,
) -> Vec<String> {
    let mut lines = vec![format!(
        "Contacts ({} online){}",
        contacts.online_count(online, local_user_id),
        if online_only { ", online only" } else { "" }
    )];

    let rows = contacts.visible(online, online_only);
    if rows.is_empty() {
        lines.push(format!("  {}", contacts.empty_state(online_only)));
    }
    for row in rows {
        lines.push(format!(
            "  {} {:<3} {} ({})",
            if row.online { "●" } else { "○" },
            row.initials,
            row.peer.display_name,
            row.peer.id
        ));
    }
    lines
}

/// Console view over a running session.
pub struct Console {
    handle: SessionHandle,
    contacts: ContactList,
    presence: Arc<dyn Presence>,
    settings: SettingsStore,
    local_user_id: UserId,
    show_online_only: bool,
    draft: String,
    rendered_peer: Option<PeerId>,
    rendered_messages: usize,
    last_snapshot: Option<SessionSnapshot>,
}

impl Console {
    pub fn new(
        handle: SessionHandle,
        contacts: ContactList,
        presence: Arc<dyn Presence>,
        settings: SettingsStore,
        local_user_id: UserId,
    ) -> Self {
        let show_online_only = settings.current().show_online_only;
        Self {
            handle,
            contacts,
            presence,
            settings,
            local_user_id,
            show_online_only,
            draft: String::new(),
            rendered_peer: None,
            rendered_messages: 0,
            last_snapshot: None,
        }
    }

    /// Reads commands from stdin until `/quit` or end of input.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut snapshots = self.handle.subscribe();

        self.print_contacts();
        println!("Type /help for commands.");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(error) => {
                            tracing::warn!(error = %error, "failed to read console input");
                            break;
                        }
                    };
                    match parse_line(&line) {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => self.apply(command).await?,
                        Err(error) => println!("! {error}"),
                    }
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.render(snapshot);
                }
                Some(notice) = self.handle.next_notice() => self.print_notice(&notice),
            }
        }

        self.handle.shutdown().await
    }

    async fn apply(&mut self, command: ConsoleCommand) -> Result<(), SessionError> {
        match command {
            ConsoleCommand::Help => print_help(),
            ConsoleCommand::Contacts => self.print_contacts(),
            ConsoleCommand::ToggleOnlineOnly => self.toggle_online_only().await,
            ConsoleCommand::Open(raw_id) => match UserId::parse(&raw_id) {
                Ok(peer_id) if self.contacts.get(&peer_id).is_some() => {
                    self.draft.clear();
                    self.handle.select_peer(Some(peer_id))?;
                }
                Ok(peer_id) => println!("! {peer_id} is not in your contacts"),
                Err(error) => println!("! {error}"),
            },
            ConsoleCommand::Close => {
                self.draft.clear();
                self.handle.select_peer(None)?;
            }
            ConsoleCommand::Attach(path) => {
                self.handle
                    .attach_file(AttachmentFile::from_path(path))?;
            }
            ConsoleCommand::Detach => self.handle.remove_attachment()?,
            ConsoleCommand::Scroll(metrics) => self.handle.scrolled(metrics)?,
            ConsoleCommand::Latest => self.handle.jump_to_latest()?,
            ConsoleCommand::Retry => self.handle.retry_history()?,
            ConsoleCommand::Quit => {}
            ConsoleCommand::Text { text, continues } => {
                // An empty Enter resubmits whatever the composer still holds.
                if !(text.is_empty() && self.draft.is_empty() && !continues) {
                    self.draft.push_str(&text);
                    self.handle.edit_draft(self.draft.clone())?;
                }
                if continues {
                    self.draft.push('\n');
                    self.handle.key_pressed(KeyPress::shift_enter())?;
                } else {
                    self.draft.clear();
                    self.handle.key_pressed(KeyPress::enter())?;
                }
            }
        }
        Ok(())
    }

    async fn toggle_online_only(&mut self) {
        self.show_online_only = !self.show_online_only;
        let show_online_only = self.show_online_only;
        let saved = self
            .settings
            .modify(|settings| settings.show_online_only = show_online_only)
            .await;
        if let Err(error) = saved {
            tracing::warn!(error = %error, "failed to save online-only preference");
        }
        self.print_contacts();
    }

    fn print_contacts(&self) {
        let online = self.presence.online_users();
        for line in render_contacts(
            &self.contacts,
            &online,
            self.show_online_only,
            &self.local_user_id,
        ) {
            println!("{line}");
        }
    }

    fn print_notice(&self, notice: &SessionNotice) {
        let label = match notice.kind {
            NoticeKind::Validation => "attachment",
            NoticeKind::Fetch => "history",
            NoticeKind::Send => "send",
            NoticeKind::Live => "live",
        };
        println!("! {label}: {}", notice.message);
        if notice.kind == NoticeKind::Fetch {
            println!("  /retry to load the conversation again");
        }
    }

    fn render(&mut self, snapshot: SessionSnapshot) {
        let previous = self.last_snapshot.take();

        if snapshot.peer_id != self.rendered_peer
            || snapshot.messages.len() < self.rendered_messages
        {
            self.rendered_peer = snapshot.peer_id.clone();
            self.rendered_messages = 0;
            match &snapshot.peer_id {
                Some(peer_id) => {
                    let name = self
                        .contacts
                        .get(peer_id)
                        .map(|peer| peer.display_name.as_str())
                        .unwrap_or(peer_id.as_str());
                    let status = if snapshot.peer_online { "online" } else { "offline" };
                    println!("== {name} ({status}) ==");
                }
                None => println!("== chat closed =="),
            }
        }

        let was_loading = previous.as_ref().is_some_and(|previous| previous.is_loading);
        if snapshot.is_loading && !was_loading {
            println!("  loading messages...");
        }
        if !snapshot.is_loading
            && snapshot.peer_id.is_some()
            && snapshot.messages.is_empty()
            && was_loading
            && !snapshot.history_failed
        {
            println!("  no messages yet");
        }

        for message in snapshot.messages.iter().skip(self.rendered_messages) {
            println!(
                "{}",
                render_message(message, &self.local_user_id, &self.contacts)
            );
        }
        self.rendered_messages = snapshot.messages.len();

        let previously_offered = previous
            .as_ref()
            .is_some_and(|previous| previous.show_jump_to_latest);
        if snapshot.show_jump_to_latest && !previously_offered {
            println!("  ↓ new messages below, /latest to jump");
        }

        let previous_preview = previous
            .as_ref()
            .and_then(|previous| previous.draft.attachment_preview.as_ref());
        if let Some(preview) = &snapshot.draft.attachment_preview
            && previous_preview != Some(preview)
        {
            println!("  attached {}, /detach to remove", render_image(preview));
        }

        let previous_state = previous.as_ref().map(|previous| &previous.draft.send_state);
        match &snapshot.draft.send_state {
            SendState::Sending if previous_state != Some(&SendState::Sending) => {
                println!("  sending...");
            }
            SendState::Failed { .. } if !matches!(previous_state, Some(SendState::Failed { .. })) => {
                println!("  draft kept; press Enter on an empty line to resend");
            }
            _ => {}
        }

        self.last_snapshot = Some(snapshot);
    }
}

fn print_help() {
    println!("/contacts               list contacts");
    println!("/online                 toggle online-only filter");
    println!("/open <id>              open a chat");
    println!("/close                  close the chat");
    println!("/attach <path>          attach an image");
    println!("/detach                 remove the attachment");
    println!("/scroll <top> <height> <viewport>");
    println!("                        report a viewport position");
    println!("/latest                 jump to the newest message");
    println!("/retry                  reload history after a failure");
    println!("/quit                   leave");
    println!("text                    send; end a line with \\ for a newline");
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use blink_core::{MessageId, MessageKey, Peer};

    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn contacts() -> ContactList {
        ContactList::new([Peer::new(user("ada"), "Ada Lovelace")])
    }

    fn message(sender: &str, recipient: &str, text: &str, image: Option<ImagePayload>) -> Message {
        Message::new(
            MessageKey::Remote(MessageId::parse("m1").unwrap()),
            user(sender),
            user(recipient),
            text,
            image,
            Utc.timestamp_opt(0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn plain_lines_submit_and_trailing_backslash_continues() {
        assert_eq!(
            parse_line("hello").unwrap(),
            ConsoleCommand::Text {
                text: "hello".to_string(),
                continues: false
            }
        );
        assert_eq!(
            parse_line("first line\\").unwrap(),
            ConsoleCommand::Text {
                text: "first line".to_string(),
                continues: true
            }
        );
    }

    #[test]
    fn commands_parse_with_arguments() {
        assert_eq!(
            parse_line("/open ada").unwrap(),
            ConsoleCommand::Open("ada".to_string())
        );
        assert_eq!(
            parse_line("/attach ./my photos/cat.png").unwrap(),
            ConsoleCommand::Attach(PathBuf::from("./my photos/cat.png"))
        );
        assert_eq!(
            parse_line("/scroll 100 1000 400").unwrap(),
            ConsoleCommand::Scroll(ScrollMetrics::new(100.0, 1000.0, 400.0))
        );
        assert_eq!(parse_line("/exit").unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn bad_commands_are_reported() {
        assert!(matches!(
            parse_line("/dance"),
            Err(ParseError::UnknownCommand { .. })
        ));
        assert!(matches!(
            parse_line("/open"),
            Err(ParseError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse_line("/scroll 1 two 3"),
            Err(ParseError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn messages_render_with_author_and_attachment() {
        let own = message("me", "ada", "hi", None);
        let theirs = message(
            "ada",
            "me",
            "look",
            Some(ImagePayload::inline("image/png", vec![1u8, 2])),
        );

        let own_line = render_message(&own, &user("me"), &contacts());
        let their_line = render_message(&theirs, &user("me"), &contacts());
        assert!(own_line.ends_with("You: hi"));
        assert!(their_line.ends_with("Ada Lovelace: [image image/png, 2 bytes] look"));
    }

    #[test]
    fn multi_line_text_is_indented() {
        let rendered = render_message(&message("me", "ada", "one\ntwo", None), &user("me"), &contacts());
        assert!(rendered.ends_with("You: one\n        two"));
    }

    #[test]
    fn contact_listing_shows_presence_and_empty_state() {
        let online = HashSet::from([user("ada")]);
        let lines = render_contacts(&contacts(), &online, false, &user("me"));
        assert_eq!(lines[0], "Contacts (1 online)");
        assert!(lines[1].contains("AL"));

        let nobody = HashSet::new();
        let lines = render_contacts(&contacts(), &nobody, true, &user("me"));
        assert_eq!(lines[1], "  No online users");
    }
}
