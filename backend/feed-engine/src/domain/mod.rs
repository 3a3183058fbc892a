pub mod models;

pub use models::{
    format_count, share_link, Comment, Conversation, Message, Profile, Record, Story, Video,
};
