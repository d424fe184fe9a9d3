//! Value Object Module

pub mod email;
pub mod login_flow;
pub mod password;
pub mod return_path;
