mod chat_service;
pub mod protocol;

pub use chat_service::ChatService;
pub use protocol::{ClientRequest, ClientResponse};
