//! HTTP/1.1 subset: request parsing, routing and response assembly.
//!
//! - [`parser`]: resumable `REQUEST_LINE -> HEADERS -> BODY` state machine
//! - [`resource`]: route table, login/registration forms, file resolution
//! - [`response`]: status lines and the bounded header buffer

pub mod parser;
pub mod resource;
pub mod response;

pub use parser::{
    LineStatus, Method, ParseState, Request, RequestOutcome, RequestParser, parse_line,
};
pub use resource::{Credentials, Resolution, resolve, route};
pub use response::{BUSY_RESPONSE, CapacityExceeded, EMPTY_PAGE, ResponseWriter, Status};
