pub mod pipeline;
pub mod request;
pub mod retry;

pub use pipeline::RequestPipeline;
pub use request::{Body, HttpRequest, HttpResponse, RequestSpec};
pub use retry::RetryPolicy;
