use std::path::PathBuf;

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/video on|off",
    "/tap",
    "/stop",
    "/persona IMAGE ROLE GENDER",
    "/specialty NAME",
    "/questions",
    "/record WAV_PATH",
    "/export PATH",
    "/reset",
    "/quit",
];

/// One line of chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Noop,
    Help,
    /// `None` reports the current setting.
    Video(Option<bool>),
    /// Tap on the playing media: toggles mute.
    Tap,
    /// The current media finished playing.
    Stop,
    /// `None` reports the current persona.
    Persona(Option<PersonaArgs>),
    Specialty(String),
    Questions,
    Record(PathBuf),
    Export(PathBuf),
    Reset,
    Quit,
    Message(String),
    /// Slash command with missing or malformed arguments, or an unknown name.
    Invalid { command: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaArgs {
    pub image: String,
    pub role: String,
    pub gender: String,
}

pub fn parse_command(text: &str) -> ChatCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ChatCommand::Noop;
    }
    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return ChatCommand::Message(trimmed.to_string());
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return ChatCommand::Message(trimmed.to_string());
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();
    let invalid = |reason: &str| ChatCommand::Invalid {
        command: command.clone(),
        reason: reason.to_string(),
    };

    match command.as_str() {
        "help" => ChatCommand::Help,
        "video" => match arg.to_ascii_lowercase().as_str() {
            "" => ChatCommand::Video(None),
            "on" | "true" | "1" => ChatCommand::Video(Some(true)),
            "off" | "false" | "0" => ChatCommand::Video(Some(false)),
            _ => invalid("expected on or off"),
        },
        "tap" => ChatCommand::Tap,
        "stop" => ChatCommand::Stop,
        "persona" => {
            let parts: Vec<&str> = arg.split_whitespace().collect();
            match parts.as_slice() {
                [] => ChatCommand::Persona(None),
                [image, role, gender] => ChatCommand::Persona(Some(PersonaArgs {
                    image: image.to_string(),
                    role: role.to_string(),
                    gender: gender.to_ascii_lowercase(),
                })),
                _ => invalid("expected IMAGE ROLE GENDER"),
            }
        }
        "specialty" if !arg.is_empty() => ChatCommand::Specialty(arg.to_string()),
        "specialty" => invalid("expected a specialty name"),
        "questions" => ChatCommand::Questions,
        "record" if !arg.is_empty() => ChatCommand::Record(PathBuf::from(arg)),
        "record" => invalid("expected a WAV path"),
        "export" if !arg.is_empty() => ChatCommand::Export(PathBuf::from(arg)),
        "export" => invalid("expected a destination path"),
        "reset" => ChatCommand::Reset,
        "quit" | "exit" => ChatCommand::Quit,
        _ => invalid("unknown command"),
    }
}
