pub mod course;
pub mod error;
pub mod gateway;

pub use course::{CourseApi, ResetAck};
pub use error::GatewayError;
pub use gateway::{ApiRequest, RequestGateway};
