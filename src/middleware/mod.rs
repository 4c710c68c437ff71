/// Middleware for the protected route scope.

mod auth;

pub use auth::AccessTokenMiddleware;
