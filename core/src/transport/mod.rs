// Transport module: HTTP seam, onion requests, message API and polling

pub mod api;
pub mod http;
pub mod onion_request;
pub mod poller;

pub use api::{OutgoingMessage, ReceivedEnvelope, SendReport, SnodeApi};
pub use http::{HttpClient, HttpError, ReqwestClient, Verb};
pub use onion_request::OnionRequestApi;
pub use poller::Poller;
