/// Business rules shared by the WebSocket and REST surfaces
pub mod chat_service;
