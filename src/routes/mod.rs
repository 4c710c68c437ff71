mod auth;
mod health_check;

pub use auth::{
    change_password, forgot_password, get_current_user, login, logout, logout_all, refresh,
    register, resend_verification, reset_password, verify_email, verify_reset_code,
};
pub use health_check::health_check;
