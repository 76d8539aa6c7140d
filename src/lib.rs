/// Hype Poster Library
///
/// Core of an unattended social-media posting bot: quota-aware scheduling,
/// uniqueness-checked content generation (templates or a hosted language
/// model), persistent post history, publishing, keyword engagement (replies
/// and reposts under the same quota) and a status surface.

pub mod bot;
pub mod config;
pub mod engagement;
pub mod generation;
pub mod history;
pub mod http_server;
pub mod llm;
pub mod publisher;
pub mod quota;
pub mod scheduler;
pub mod status;
