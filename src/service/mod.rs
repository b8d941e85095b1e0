pub mod chat_service;
pub mod fallback;
pub mod sanitizer;
