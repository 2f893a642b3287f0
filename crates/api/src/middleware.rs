use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use stacks_core::UserId;

use crate::app::errors;
use crate::context::CallerContext;

/// Header carrying the caller identity.
pub const USER_HEADER: &str = "x-user-email";

/// Attach [`CallerContext`] from the identity header, or reject with 400.
pub async fn caller_identity(mut req: Request, next: Next) -> Response {
    let user = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| UserId::new(v).ok());

    let Some(user) = user else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_identity",
            "User email required in headers",
        );
    };

    req.extensions_mut().insert(CallerContext::new(user));
    next.run(req).await
}
