mod command;
mod log;
mod voice;

pub use command::{parse_command, ChatCommand, PersonaArgs, CHAT_HELP_COMMANDS};
pub use log::{ChatEntry, ChatLog, Speaker};
pub use voice::{ReplyTrigger, VoiceSelector};
