pub mod chat;
pub mod errors;
pub mod events;
pub mod media;
pub mod prefs;
