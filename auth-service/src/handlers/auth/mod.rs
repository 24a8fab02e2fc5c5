pub mod password;
pub mod session;

pub use password::{request_password_reset, reset_password};
pub use session::{introspect_session, login, logout, refresh_session};
