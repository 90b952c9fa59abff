mod auth;
mod health_check;

pub use auth::{
    client_fingerprint, current_user, login, logout, refresh, register, REFRESH_COOKIE,
};
pub use health_check::health_check;
