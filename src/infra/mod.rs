pub mod http_client;
pub mod openai_client;
pub mod sqlite_sink;
