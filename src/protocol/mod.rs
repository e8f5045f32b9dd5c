pub mod openai_chat;
pub mod render;
pub mod upstream;
