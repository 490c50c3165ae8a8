pub mod auth;
pub mod error;
pub mod planning;
pub mod todos;
pub mod users;
