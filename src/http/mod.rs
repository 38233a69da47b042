//! Transport-independent request/response types and status-code policy.

mod request;
mod response;
mod status;

pub use request::{CachePolicy, LogicalRequest, RequestBuilder, TransportRequest};
pub use response::{
    GenericResponse, HttpResponse, LogicalResponse, RawResponse, ResponseBuilder,
};
pub use status::{AcceptableStatusSet, reason_phrase};
