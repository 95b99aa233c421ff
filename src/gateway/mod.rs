//! Request dispatch.
//!
//! A [`Gateway`] owns the route table and the middleware list. For each
//! request it normalizes the input, picks a route, validates the body, runs
//! the middleware chain around the handler and wraps the result in the
//! response envelope.
//!
//! ```text
//! ApiRequest ─► normalize ─► match ─► validate ─► middleware… ─► handler
//!                  │            │          │                        │
//!                 400        404/405      400                  200 / error
//! ```

mod dispatcher;
mod error;
mod health;
mod route;
mod types;

pub use dispatcher::Gateway;
pub use error::{ApiError, ErrorCode, RouteError};
pub use route::{BodyValidator, Handler, Route, RouteDefinition, ValidationIssue};
pub use types::{
    ApiRequest, ApiResponse, ErrorBody, ErrorPayload, HandlerOutput, Method, Principal,
    RequestContext, RequestData, ResponseBody, RouteMeta, StringMap, SuccessBody,
    UnsupportedMethod,
};
